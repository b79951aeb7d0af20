//! A running replica of a microservice and its request state machine.
//!
//! An instance handles a request by either answering it (all work done),
//! submitting it to its CPU (dependencies satisfied), or fanning out one
//! internal request per unsatisfied dependency. Answers re-enter through
//! [`MicroserviceInstance::handle_answer`], CPU completions through
//! [`MicroserviceInstance::on_process_completion`]; both converge back
//! on `handle`.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use misim_core::{log_debug, log_trace, log_warn, SimulationContext};

use crate::architecture::{Architecture, InstanceId, ServiceId};
use crate::cpu::{Cpu, CpuProcess};
use crate::events::{InstanceShutdownEnd, RequestFailure, RetryRequest};
use crate::network::Network;
use crate::patterns::{FailureDecision, InstancePattern, PatternContext, SendDecision};
use crate::reporter::MultiDataPointReporter;
use crate::request::{DependencyInstance, RequestFailedReason, RequestId, RequestRegistry, Requester};

/// Lifecycle states of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Shutdown,
    Killed,
}

impl InstanceState {
    fn name(&self) -> &'static str {
        match self {
            InstanceState::Created => "CREATED",
            InstanceState::Starting => "STARTING",
            InstanceState::Running => "RUNNING",
            InstanceState::ShuttingDown => "SHUTTING_DOWN",
            InstanceState::Shutdown => "SHUTDOWN",
            InstanceState::Killed => "KILLED",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One running replica of a microservice.
pub struct MicroserviceInstance {
    id: InstanceId,
    name: String,
    service: ServiceId,
    state: InstanceState,
    cpu: Cpu,
    requests_in_system: IndexSet<RequestId>,
    open_dependencies: IndexSet<(RequestId, usize)>,
    answers_in_flight: IndexSet<RequestId>,
    internal_sends: IndexSet<RequestId>,
    patterns: Vec<Box<dyn InstancePattern>>,
    reporter: MultiDataPointReporter,
    not_computed: u64,
    waiting_for_dependencies: u64,
    stale_answers: u64,
    arch: Rc<Architecture>,
    ctx: Rc<SimulationContext>,
}

impl MicroserviceInstance {
    /// Creates an instance in the `CREATED` state.
    ///
    /// `patterns` is the send-path interceptor chain, outermost first.
    pub fn new(
        id: InstanceId,
        name: String,
        service: ServiceId,
        patterns: Vec<Box<dyn InstancePattern>>,
        arch: Rc<Architecture>,
        reporter: MultiDataPointReporter,
        ctx: Rc<SimulationContext>,
    ) -> Self {
        let capacity = arch.services[service].capacity;
        let instance = Self {
            id,
            name,
            service,
            state: InstanceState::Created,
            cpu: Cpu::new(capacity, id, None, ctx.clone()),
            requests_in_system: IndexSet::new(),
            open_dependencies: IndexSet::new(),
            answers_in_flight: IndexSet::new(),
            internal_sends: IndexSet::new(),
            patterns,
            reporter,
            not_computed: 0,
            waiting_for_dependencies: 0,
            stale_answers: 0,
            arch,
            ctx,
        };
        instance
            .reporter
            .add_label("State", instance.ctx.time(), InstanceState::Created.name());
        instance
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Fraction of CPU capacity currently in use.
    pub fn usage(&self) -> f64 {
        self.cpu.current_usage()
    }

    /// Outstanding CPU demand relative to capacity.
    pub fn relative_work_demand(&self) -> f64 {
        self.cpu.current_relative_work_demand()
    }

    fn change_state(&mut self, target: InstanceState) {
        if self.state == target {
            return;
        }
        log_debug!(self.ctx, "instance {} changed to state {}", self.name, target);
        self.reporter.add_label("State", self.ctx.time(), target.name());
        self.state = target;
    }

    /// Starts the instance, readying it to receive requests. The startup
    /// completes immediately.
    pub fn start(&mut self) {
        if !matches!(self.state, InstanceState::Created | InstanceState::Shutdown) {
            panic!(
                "illegal instance transition: cannot start instance '{}' from state {}",
                self.name, self.state
            );
        }
        self.change_state(InstanceState::Starting);
        self.change_state(InstanceState::Running);
    }

    /// Begins draining: no new requests are accepted, open ones are
    /// completed.
    pub fn start_shutdown(&mut self) {
        if !matches!(self.state, InstanceState::Created | InstanceState::Running) {
            panic!(
                "illegal instance transition: cannot shut down instance '{}' from state {}",
                self.name, self.state
            );
        }
        if self.requests_in_system.is_empty() {
            self.ctx.emit_self_now(InstanceShutdownEnd { instance: self.id });
        }
        self.change_state(InstanceState::ShuttingDown);
    }

    /// Completes the shutdown once the last request left the instance.
    pub fn end_shutdown(&mut self) {
        if self.state != InstanceState::ShuttingDown {
            panic!(
                "illegal instance transition: instance '{}' has not started its shutdown (state {})",
                self.name, self.state
            );
        }
        debug_assert!(self.requests_in_system.is_empty() && self.cpu.is_idle());
        self.change_state(InstanceState::Shutdown);
    }

    /// Kills the instance immediately. All computations are dropped,
    /// in-flight sends are canceled and every handled request fails back
    /// to its sender with `ConnectionReset`.
    pub fn die(&mut self, registry: &mut RequestRegistry, network: &Network) {
        if self.state == InstanceState::Killed {
            panic!(
                "illegal instance transition: instance '{}' was already killed",
                self.name
            );
        }
        self.change_state(InstanceState::Killed);
        self.cpu.clear();

        let mut canceled_events = Vec::new();

        // answers still traveling are lost; their requesters observe a
        // reset connection
        for answered in std::mem::take(&mut self.answers_in_flight) {
            let event = registry.get_mut(answered).answer_event.take();
            if let Some(event) = event {
                self.ctx.cancel_event(event);
                let req = registry.get_mut(answered);
                req.canceled = true;
                req.failure = Some(RequestFailedReason::ConnectionReset);
                network.send_failure(&self.ctx, registry, answered, RequestFailedReason::ConnectionReset);
            }
        }

        // children still in flight are canceled outright
        for child in std::mem::take(&mut self.internal_sends) {
            registry.cancel_in_flight(child, &mut canceled_events);
        }

        // handled requests fail back to their senders
        for request in std::mem::take(&mut self.requests_in_system) {
            registry.cancel_open_children(request, &mut canceled_events);
            {
                let req = registry.get_mut(request);
                req.canceled = true;
                req.failure = Some(RequestFailedReason::ConnectionReset);
            }
            network.send_failure(&self.ctx, registry, request, RequestFailedReason::ConnectionReset);
        }

        self.open_dependencies.clear();
        for event in canceled_events {
            self.ctx.cancel_event(event);
        }
    }

    /// Checks whether this instance may accept the request: running, or
    /// draining and already owning the request (or its parent).
    pub fn can_handle(&self, registry: &RequestRegistry, request: RequestId) -> bool {
        match self.state {
            InstanceState::Running => true,
            InstanceState::ShuttingDown => {
                self.requests_in_system.contains(&request)
                    || registry
                        .get(request)
                        .parent
                        .is_some_and(|parent| self.requests_in_system.contains(&parent))
            }
            _ => false,
        }
    }

    /// Submits a request for handling.
    pub fn handle(&mut self, registry: &mut RequestRegistry, network: &Network, request: RequestId) {
        if self.requests_in_system.insert(request) {
            registry.get_mut(request).handler = Some((self.service, self.id));
            self.not_computed += 1;
            self.waiting_for_dependencies += 1;
            self.concretize_dependencies(registry, request);
        }
        self.process(registry, network, request);
        self.collect_statistics();
    }

    /// Samples the declared dependencies of the target operation into
    /// per-request dependency instances. Runs once per request.
    fn concretize_dependencies(&mut self, registry: &mut RequestRegistry, request: RequestId) {
        let operation = {
            let req = registry.get(request);
            if req.dependencies_concretized {
                return;
            }
            req.operation
        };
        let mut dependencies = Vec::new();
        for spec in &self.arch.operations[operation].dependencies {
            if spec.probability >= 1.0 || self.ctx.rand() < spec.probability {
                dependencies.push(DependencyInstance {
                    service: spec.service,
                    operation: spec.operation,
                    child: None,
                    satisfied: false,
                });
            }
        }
        let req = registry.get_mut(request);
        req.dependencies = dependencies;
        req.dependencies_concretized = true;
    }

    fn process(&mut self, registry: &mut RequestRegistry, network: &Network, request: RequestId) {
        let (completed, ready, demand) = {
            let req = registry.get(request);
            (req.is_completed(), req.are_dependencies_completed(), req.demand)
        };
        if completed {
            self.not_computed -= 1;
            registry.get_mut(request).answered = true;
            network.send_answer(&self.ctx, registry, request);
            self.answers_in_flight.insert(request);
            self.requests_in_system.shift_remove(&request);
            log_trace!(self.ctx, "instance {} answered request {}", self.name, request);
            if self.requests_in_system.is_empty() && self.state == InstanceState::ShuttingDown {
                self.ctx.emit_self_now(InstanceShutdownEnd { instance: self.id });
            }
        } else if ready {
            self.waiting_for_dependencies -= 1;
            self.cpu.submit(CpuProcess { request, demand });
        } else {
            let slots: Vec<usize> = registry
                .get(request)
                .dependencies
                .iter()
                .enumerate()
                .filter(|(_, dep)| !dep.satisfied && dep.child.is_none())
                .map(|(slot, _)| slot)
                .collect();
            for slot in slots {
                self.open_dependencies.insert((request, slot));
                self.send_dependency_request(registry, network, request, slot);
            }
        }
    }

    /// Creates and sends the internal request collecting one dependency,
    /// running the send-path interceptors outermost first.
    fn send_dependency_request(
        &mut self,
        registry: &mut RequestRegistry,
        network: &Network,
        parent: RequestId,
        slot: usize,
    ) {
        let operation = registry.get(parent).dependencies[slot].operation;
        let demand = self.arch.operations[operation].demand;
        let child = registry.new_internal_request(
            parent,
            slot,
            demand,
            Requester::Instance {
                service: self.service,
                instance: self.id,
            },
            self.ctx.time(),
        );
        self.internal_sends.insert(child);
        for pattern in self.patterns.iter_mut() {
            let mut pc = PatternContext {
                ctx: &self.ctx,
                registry: &mut *registry,
            };
            if let SendDecision::Reject(reason) = pattern.on_send(&mut pc, child) {
                // fails locally, without network traversal
                self.ctx.emit_self_now(RequestFailure { request: child, reason });
                return;
            }
        }
        network.send_request(&self.ctx, registry, child);
    }

    /// Handles the answer of an internal request this instance sent.
    /// Stale answers (the dependency was resolved or canceled in the
    /// meantime) are logged and dropped.
    pub fn handle_answer(&mut self, registry: &mut RequestRegistry, network: &Network, answered: RequestId) {
        self.internal_sends.shift_remove(&answered);
        let (parent, slot) = {
            let req = registry.get(answered);
            match (req.parent, req.dependency_slot) {
                (Some(parent), Some(slot)) => (parent, slot),
                _ => {
                    log_warn!(self.ctx, "instance {} received an answer for a non-internal request", self.name);
                    return;
                }
            }
        };
        let valid = self.open_dependencies.contains(&(parent, slot))
            && self.requests_in_system.contains(&parent)
            && registry.get(parent).dependencies[slot].child == Some(answered);
        if !valid {
            self.stale_answers += 1;
            log_warn!(
                self.ctx,
                "instance {} dropped a stale answer for request {} (resolved or canceled before)",
                self.name,
                answered
            );
            self.reporter
                .add("Requests_StaleAnswers", self.ctx.time(), self.stale_answers as f64);
            // the unwanted result still releases the interceptors' hold
            for pattern in self.patterns.iter_mut().rev() {
                let mut pc = PatternContext {
                    ctx: &self.ctx,
                    registry: &mut *registry,
                };
                pattern.on_canceled(&mut pc, answered);
            }
            return;
        }
        // reply path runs the interceptors in reverse order
        for pattern in self.patterns.iter_mut().rev() {
            let mut pc = PatternContext {
                ctx: &self.ctx,
                registry: &mut *registry,
            };
            pattern.on_result(&mut pc, answered);
        }
        self.open_dependencies.shift_remove(&(parent, slot));
        if registry.notify_dependency_finished(parent, slot) {
            self.handle(registry, network, parent);
        }
        self.collect_statistics();
    }

    /// Handles a CPU completion event.
    pub fn on_process_completion(&mut self, registry: &mut RequestRegistry, network: &Network, request: RequestId) {
        let completed = match self.cpu.on_completion(request) {
            Some(request) => request,
            None => return,
        };
        registry.get_mut(completed).computed = true;
        self.handle(registry, network, completed);
    }

    /// Re-sends the child request of a dependency after a retry backoff,
    /// unless the parent has left the instance in the meantime.
    pub fn resend_dependency(
        &mut self,
        registry: &mut RequestRegistry,
        network: &Network,
        parent: RequestId,
        slot: usize,
    ) {
        if !self.requests_in_system.contains(&parent)
            || !self.open_dependencies.contains(&(parent, slot))
            || registry.get(parent).canceled
        {
            return;
        }
        log_debug!(
            self.ctx,
            "instance {} retries dependency {} of request {}",
            self.name,
            slot,
            parent
        );
        self.send_dependency_request(registry, network, parent, slot);
    }

    /// Handles the failure of an outgoing request: runs the reply-path
    /// interceptors (retry decides, circuit breaker observes) and, when
    /// unrecovered, fails the parent request.
    pub fn on_request_failed(
        &mut self,
        registry: &mut RequestRegistry,
        network: &Network,
        child: RequestId,
        reason: RequestFailedReason,
    ) {
        self.internal_sends.shift_remove(&child);
        {
            let req = registry.get_mut(child);
            req.canceled = true;
            req.failure = Some(reason);
        }
        let mut final_reason = reason;
        let mut retry_delay = None;
        for pattern in self.patterns.iter_mut().rev() {
            let mut pc = PatternContext {
                ctx: &self.ctx,
                registry: &mut *registry,
            };
            // the first retry decision wins, but later listeners still
            // observe the failure (the circuit breaker keeps counting)
            match pattern.on_failed(&mut pc, child, final_reason) {
                FailureDecision::Passthrough => {}
                FailureDecision::Retry { delay } => {
                    if retry_delay.is_none() {
                        retry_delay = Some(delay);
                    }
                }
                FailureDecision::Escalate(escalated) => final_reason = escalated,
            }
        }
        if let Some(delay) = retry_delay {
            let req = registry.get(child);
            if let (Some(parent), Some(slot)) = (req.parent, req.dependency_slot) {
                self.ctx.emit_self(RetryRequest { parent, slot }, delay);
            }
            self.collect_statistics();
            return;
        }
        if final_reason != reason {
            registry.get_mut(child).failure = Some(final_reason);
        }
        self.let_request_fail(registry, network, child, final_reason);
        self.collect_statistics();
    }

    /// Unrecovered child failure: cancels the parent with
    /// `DependencyNotAvailable`, cancels its remaining in-flight
    /// children and notifies the parent's requester.
    fn let_request_fail(
        &mut self,
        registry: &mut RequestRegistry,
        network: &Network,
        child: RequestId,
        _reason: RequestFailedReason,
    ) {
        let (parent, slot) = {
            let req = registry.get(child);
            match (req.parent, req.dependency_slot) {
                (Some(parent), Some(slot)) => (parent, slot),
                _ => return,
            }
        };
        // a newer retry child already took over the slot
        if registry.get(parent).dependencies[slot].child != Some(child) {
            return;
        }
        if !self.open_dependencies.contains(&(parent, slot)) || !self.requests_in_system.contains(&parent) {
            log_warn!(
                self.ctx,
                "instance {} ignored a failure of request {} it no longer handles",
                self.name,
                child
            );
            return;
        }

        let mut canceled_events = Vec::new();
        let canceled_children = registry.cancel_open_children(parent, &mut canceled_events);
        for event in canceled_events {
            self.ctx.cancel_event(event);
        }
        for sibling in canceled_children {
            for pattern in self.patterns.iter_mut().rev() {
                let mut pc = PatternContext {
                    ctx: &self.ctx,
                    registry: &mut *registry,
                };
                pattern.on_canceled(&mut pc, sibling);
            }
        }
        let dependency_count = registry.get(parent).dependencies.len();
        for dep_slot in 0..dependency_count {
            self.open_dependencies.shift_remove(&(parent, dep_slot));
            if let Some(sibling) = registry.get(parent).dependencies[dep_slot].child {
                self.internal_sends.shift_remove(&sibling);
            }
        }
        self.requests_in_system.shift_remove(&parent);
        self.not_computed -= 1;
        self.waiting_for_dependencies -= 1;
        {
            let req = registry.get_mut(parent);
            req.canceled = true;
            req.failure = Some(RequestFailedReason::DependencyNotAvailable);
        }
        network.send_failure(&self.ctx, registry, parent, RequestFailedReason::DependencyNotAvailable);
        if self.requests_in_system.is_empty() && self.state == InstanceState::ShuttingDown {
            self.ctx.emit_self_now(InstanceShutdownEnd { instance: self.id });
        }
    }

    fn collect_statistics(&self) {
        let now = self.ctx.time();
        self.reporter
            .add("SendOff_Internal_Requests", now, self.open_dependencies.len() as f64);
        self.reporter
            .add("Requests_InSystem", now, self.requests_in_system.len() as f64);
        self.reporter.add("Requests_NotComputed", now, self.not_computed as f64);
        self.reporter
            .add("Requests_WaitingForDependencies", now, self.waiting_for_dependencies as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use misim_core::Simulation;

    use super::*;
    use crate::architecture::{ArchitectureModel, OperationDescription, ServiceDescription};
    use crate::reporter::ReportSink;

    fn test_setup() -> (Simulation, MicroserviceInstance, Network, RequestRegistry) {
        let arch = Rc::new(
            ArchitectureModel {
                services: vec![ServiceDescription {
                    name: "svc".into(),
                    capacity: 2.0,
                    instances: 1,
                    patterns: vec![],
                    operations: vec![OperationDescription {
                        name: "op".into(),
                        demand: 1.0,
                        dependencies: vec![],
                    }],
                }],
                network: Default::default(),
            }
            .resolve()
            .unwrap(),
        );
        let mut sim = Simulation::new(1);
        let network = Network::new(&arch, sim.create_context("network")).unwrap();
        let ctx = Rc::new(sim.create_context("svc"));
        let sink = Rc::new(RefCell::new(ReportSink::default()));
        let reporter = MultiDataPointReporter::new("I[svc_0]_", sink);
        let instance = MicroserviceInstance::new(0, "svc_0".into(), 0, Vec::new(), arch, reporter, ctx);
        (sim, instance, network, RequestRegistry::new())
    }

    #[test]
    fn start_moves_through_starting_into_running() {
        let (_sim, mut instance, _network, _registry) = test_setup();
        assert_eq!(instance.state(), InstanceState::Created);
        instance.start();
        assert_eq!(instance.state(), InstanceState::Running);
    }

    #[test]
    fn shutdown_and_restart_round_trip() {
        let (_sim, mut instance, _network, _registry) = test_setup();
        instance.start();
        instance.start_shutdown();
        assert_eq!(instance.state(), InstanceState::ShuttingDown);
        instance.end_shutdown();
        assert_eq!(instance.state(), InstanceState::Shutdown);
        // a shut down instance may be started again
        instance.start();
        assert_eq!(instance.state(), InstanceState::Running);
    }

    #[test]
    #[should_panic(expected = "illegal instance transition")]
    fn starting_a_running_instance_panics() {
        let (_sim, mut instance, _network, _registry) = test_setup();
        instance.start();
        instance.start();
    }

    #[test]
    #[should_panic(expected = "illegal instance transition")]
    fn shutting_down_a_draining_instance_panics() {
        let (_sim, mut instance, _network, _registry) = test_setup();
        instance.start();
        instance.start_shutdown();
        instance.start_shutdown();
    }

    #[test]
    #[should_panic(expected = "illegal instance transition")]
    fn ending_shutdown_without_draining_panics() {
        let (_sim, mut instance, _network, _registry) = test_setup();
        instance.start();
        instance.end_shutdown();
    }

    #[test]
    #[should_panic(expected = "illegal instance transition")]
    fn killing_a_killed_instance_panics() {
        let (_sim, mut instance, network, mut registry) = test_setup();
        instance.start();
        instance.die(&mut registry, &network);
        instance.die(&mut registry, &network);
    }

    #[test]
    fn dying_instance_is_empty_afterwards() {
        let (_sim, mut instance, network, mut registry) = test_setup();
        instance.start();
        instance.die(&mut registry, &network);
        assert_eq!(instance.state(), InstanceState::Killed);
        assert_eq!(instance.relative_work_demand(), 0.0);
        assert_eq!(instance.usage(), 0.0);
    }
}
