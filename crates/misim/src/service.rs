//! A microservice: the instance pool and its event dispatch.
//!
//! The service is the simulation component for everything instance
//! bound: request arrivals (routed through the load balancer), answers
//! and failures for its instances' outgoing requests, CPU completions,
//! retries, shutdown completions, autoscaler ticks and chaos faults.

use std::cell::RefCell;
use std::rc::Rc;

use misim_core::{dispatch, Event, EventHandler, SimulationContext};
use misim_core::{log_debug, log_warn};

use crate::architecture::{Architecture, InstanceId, ServiceId};
use crate::events::{
    AnswerArrival, AutoscalerTick, InstanceShutdownEnd, KillInstances, ProcessCompletion, RequestArrival,
    RequestFailure, RequestTimeout, RetryRequest, StartInstances,
};
use crate::instance::{InstanceState, MicroserviceInstance};
use crate::network::Network;
use crate::patterns::{Autoscaler, CircuitBreaker, InstancePattern, LoadBalancer, Retry};
use crate::reporter::{MultiDataPointReporter, ReportSink};
use crate::request::{RequestFailedReason, RequestId, RequestRegistry, Requester};

pub struct Microservice {
    id: ServiceId,
    name: String,
    instances: Vec<MicroserviceInstance>,
    instance_counter: InstanceId,
    balancer: LoadBalancer,
    autoscaler: Option<Autoscaler>,
    arch: Rc<Architecture>,
    registry: Rc<RefCell<RequestRegistry>>,
    network: Rc<RefCell<Network>>,
    sink: Rc<RefCell<ReportSink>>,
    reporter: MultiDataPointReporter,
    ctx: Rc<SimulationContext>,
}

impl Microservice {
    pub fn new(
        id: ServiceId,
        arch: Rc<Architecture>,
        registry: Rc<RefCell<RequestRegistry>>,
        network: Rc<RefCell<Network>>,
        sink: Rc<RefCell<ReportSink>>,
        ctx: Rc<SimulationContext>,
    ) -> Self {
        let spec = &arch.services[id];
        let name = spec.name.clone();
        let balancer = LoadBalancer::new(spec.balancing);
        let autoscaler = spec.autoscaler.map(Autoscaler::new);
        let reporter = MultiDataPointReporter::new(format!("S[{}]_", name), sink.clone());
        Self {
            id,
            name,
            instances: Vec::new(),
            instance_counter: 0,
            balancer,
            autoscaler,
            arch,
            registry,
            network,
            sink,
            reporter,
            ctx,
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the initial instances and arms the autoscaler.
    pub fn activate(&mut self) {
        for _ in 0..self.arch.services[self.id].initial_instances {
            self.spawn_instance();
        }
        if let Some(autoscaler) = &self.autoscaler {
            self.ctx.emit_self(AutoscalerTick {}, autoscaler.period());
        }
        self.report_instance_count();
    }

    fn build_patterns(&self) -> Vec<Box<dyn InstancePattern>> {
        let spec = &self.arch.services[self.id];
        // send-path order, outermost first: circuit breaker, then retry
        let mut patterns: Vec<Box<dyn InstancePattern>> = Vec::new();
        if let Some(config) = spec.circuit_breaker {
            patterns.push(Box::new(CircuitBreaker::new(config)));
        }
        if let Some(config) = spec.retry {
            patterns.push(Box::new(Retry::new(config)));
        }
        patterns
    }

    fn spawn_instance(&mut self) {
        let id = self.instance_counter;
        self.instance_counter += 1;
        let name = format!("{}_{}", self.name, id);
        let reporter = MultiDataPointReporter::new(format!("I[{}]_", name), self.sink.clone());
        let mut instance = MicroserviceInstance::new(
            id,
            name,
            self.id,
            self.build_patterns(),
            self.arch.clone(),
            reporter,
            self.ctx.clone(),
        );
        instance.start();
        self.instances.push(instance);
    }

    fn instance_index(&self, id: InstanceId) -> Option<usize> {
        self.instances.iter().position(|instance| instance.id() == id)
    }

    /// Number of instances currently accepting requests.
    pub fn running_instances(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.state() == InstanceState::Running)
            .count()
    }

    /// Names and states of all pooled instances.
    pub fn instance_states(&self) -> Vec<(String, InstanceState)> {
        self.instances
            .iter()
            .map(|instance| (instance.name().to_owned(), instance.state()))
            .collect()
    }

    /// Mean outstanding CPU demand of the running instances, relative to
    /// their capacity.
    pub fn mean_relative_work_demand(&self) -> f64 {
        let running: Vec<&MicroserviceInstance> = self
            .instances
            .iter()
            .filter(|instance| instance.state() == InstanceState::Running)
            .collect();
        if running.is_empty() {
            return 0.0;
        }
        running.iter().map(|instance| instance.relative_work_demand()).sum::<f64>() / running.len() as f64
    }

    /// Scales the pool towards `target` instances: spawns missing ones
    /// or drains surplus ones, oldest first.
    pub fn scale_to(&mut self, target: u32) {
        let active = self
            .instances
            .iter()
            .filter(|instance| {
                matches!(
                    instance.state(),
                    InstanceState::Created | InstanceState::Starting | InstanceState::Running
                )
            })
            .count() as u32;
        if target > active {
            for _ in 0..(target - active) {
                self.spawn_instance();
            }
        } else {
            let mut to_stop = active - target;
            for instance in self.instances.iter_mut() {
                if to_stop == 0 {
                    break;
                }
                if matches!(instance.state(), InstanceState::Created | InstanceState::Running) {
                    instance.start_shutdown();
                    to_stop -= 1;
                }
            }
        }
        self.report_instance_count();
    }

    /// Kills `count` running instances chosen uniformly at random.
    pub fn kill_instances(&mut self, count: u32) {
        let registry = self.registry.clone();
        let network = self.network.clone();
        let mut registry = registry.borrow_mut();
        let network = network.borrow();
        let mut candidates: Vec<usize> = self
            .instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| instance.state() == InstanceState::Running)
            .map(|(index, _)| index)
            .collect();
        let victims = (count as usize).min(candidates.len());
        log_debug!(self.ctx, "killing {} of {} running instances", victims, candidates.len());
        for _ in 0..victims {
            let pick = self.ctx.gen_range(0..candidates.len());
            let index = candidates.swap_remove(pick);
            self.instances[index].die(&mut registry, &network);
        }
        drop(registry);
        drop(network);
        self.instances.retain(|instance| instance.state() != InstanceState::Killed);
        self.report_instance_count();
    }

    fn start_instances(&mut self, count: u32) {
        for _ in 0..count {
            self.spawn_instance();
        }
        self.report_instance_count();
    }

    fn report_instance_count(&self) {
        self.reporter
            .add("InstanceCount", self.ctx.time(), self.running_instances() as f64);
    }

    fn fail_request(
        &self,
        registry: &mut RequestRegistry,
        network: &Network,
        request: RequestId,
        reason: RequestFailedReason,
    ) {
        {
            let req = registry.get_mut(request);
            req.canceled = true;
            req.failure = Some(reason);
        }
        network.send_failure(&self.ctx, registry, request, reason);
    }

    fn on_request_arrival(&mut self, request: RequestId) {
        let registry = self.registry.clone();
        let network = self.network.clone();
        let mut registry = registry.borrow_mut();
        let network = network.borrow();
        {
            let req = registry.get_mut(request);
            req.arrival_event = None;
            if req.canceled {
                return;
            }
            // the arrival won, the timeout loses
            if let Some(timeout) = req.timeout_event.take() {
                self.ctx.cancel_event(timeout);
            }
        }
        match self.balancer.select(&self.ctx, &self.instances) {
            None => {
                log_warn!(self.ctx, "no available instance for request {}", request);
                self.fail_request(&mut registry, &network, request, RequestFailedReason::NoInstance);
            }
            Some(index) => {
                if self.instances[index].can_handle(&registry, request) {
                    self.instances[index].handle(&mut registry, &network, request);
                } else {
                    self.fail_request(&mut registry, &network, request, RequestFailedReason::HandlerUnavailable);
                }
            }
        }
    }

    fn on_answer_arrival(&mut self, request: RequestId) {
        let registry = self.registry.clone();
        let network = self.network.clone();
        let mut registry = registry.borrow_mut();
        let network = network.borrow();
        registry.get_mut(request).answer_event = None;
        let requester = registry.get(request).requester;
        match requester {
            Requester::Instance { service, instance } if service == self.id => {
                match self.instance_index(instance) {
                    Some(index) => self.instances[index].handle_answer(&mut registry, &network, request),
                    None => log_warn!(self.ctx, "dropping answer for request {}: its requester is gone", request),
                }
            }
            _ => log_warn!(self.ctx, "dropping misrouted answer for request {}", request),
        }
    }

    fn on_request_timeout(&mut self, request: RequestId) {
        let registry = self.registry.clone();
        let network = self.network.clone();
        let mut registry = registry.borrow_mut();
        let network = network.borrow();
        {
            let req = registry.get_mut(request);
            // the arrival won earlier
            if req.timeout_event.is_none() {
                return;
            }
            req.timeout_event = None;
            req.canceled = true;
            if let Some(arrival) = req.arrival_event.take() {
                self.ctx.cancel_event(arrival);
            }
        }
        self.route_failure(&mut registry, &network, request, RequestFailedReason::Timeout);
    }

    fn on_request_failure(&mut self, request: RequestId, reason: RequestFailedReason) {
        let registry = self.registry.clone();
        let network = self.network.clone();
        let mut registry = registry.borrow_mut();
        let network = network.borrow();
        self.route_failure(&mut registry, &network, request, reason);
    }

    fn route_failure(
        &mut self,
        registry: &mut RequestRegistry,
        network: &Network,
        request: RequestId,
        reason: RequestFailedReason,
    ) {
        let requester = registry.get(request).requester;
        match requester {
            Requester::Instance { service, instance } if service == self.id => {
                match self.instance_index(instance) {
                    Some(index) => self.instances[index].on_request_failed(registry, network, request, reason),
                    None => log_warn!(
                        self.ctx,
                        "dropping failure of request {}: its requester is gone",
                        request
                    ),
                }
            }
            _ => log_warn!(self.ctx, "dropping misrouted failure of request {}", request),
        }
    }

    fn on_process_completion(&mut self, instance: InstanceId, request: RequestId) {
        let registry = self.registry.clone();
        let network = self.network.clone();
        let mut registry = registry.borrow_mut();
        let network = network.borrow();
        if let Some(index) = self.instance_index(instance) {
            self.instances[index].on_process_completion(&mut registry, &network, request);
        }
    }

    fn on_instance_shutdown_end(&mut self, instance: InstanceId) {
        if let Some(index) = self.instance_index(instance) {
            if self.instances[index].state() == InstanceState::ShuttingDown {
                self.instances[index].end_shutdown();
                self.instances.remove(index);
                self.report_instance_count();
            }
        }
    }

    fn on_retry_request(&mut self, parent: RequestId, slot: usize) {
        let registry = self.registry.clone();
        let network = self.network.clone();
        let mut registry = registry.borrow_mut();
        let network = network.borrow();
        let handler = registry.get(parent).handler;
        match handler {
            Some((service, instance)) if service == self.id => {
                if let Some(index) = self.instance_index(instance) {
                    self.instances[index].resend_dependency(&mut registry, &network, parent, slot);
                }
            }
            _ => {}
        }
    }

    fn on_autoscaler_tick(&mut self) {
        if self.autoscaler.is_none() {
            return;
        }
        let now = self.ctx.time();
        let running = self.running_instances() as u32;
        let mean_demand = self.mean_relative_work_demand();
        let (period, target) = {
            let autoscaler = self.autoscaler.as_mut().unwrap();
            (autoscaler.period(), autoscaler.evaluate(now, running, mean_demand))
        };
        if let Some(target) = target {
            log_debug!(
                self.ctx,
                "autoscaler adjusts {} from {} to {} instances (mean demand {:.3})",
                self.name,
                running,
                target,
                mean_demand
            );
            self.scale_to(target);
        }
        self.ctx.emit_self(AutoscalerTick {}, period);
    }
}

impl EventHandler for Microservice {
    fn on(&mut self, event: Event) {
        dispatch!(match event.data {
            RequestArrival { request } => {
                self.on_request_arrival(request);
            }
            AnswerArrival { request } => {
                self.on_answer_arrival(request);
            }
            RequestTimeout { request } => {
                self.on_request_timeout(request);
            }
            RequestFailure { request, reason } => {
                self.on_request_failure(request, reason);
            }
            ProcessCompletion { instance, request } => {
                self.on_process_completion(instance, request);
            }
            InstanceShutdownEnd { instance } => {
                self.on_instance_shutdown_end(instance);
            }
            RetryRequest { parent, slot } => {
                self.on_retry_request(parent, slot);
            }
            AutoscalerTick {} => {
                self.on_autoscaler_tick();
            }
            KillInstances { count } => {
                self.kill_instances(count);
            }
            StartInstances { count } => {
                self.start_instances(count);
            }
        })
    }
}
