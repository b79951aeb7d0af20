//! Network layer: modeled as pairs of scheduled events.
//!
//! Sending a request schedules its arrival at the target service after
//! the configured latency, together with a timeout event at the sender.
//! Whichever of {arrival, timeout, explicit cancel} fires first wins and
//! cancels the others. Answers traverse the network with latency but
//! carry no timeout.

use std::collections::HashMap;

use misim_core::{dispatch, Event, EventHandler, Id, SimulationContext};
use misim_core::{log_debug, log_trace};
use rand_distr::Normal;
use serde::Serialize;

use crate::architecture::{Architecture, ArchitectureError, ServiceId};
use crate::events::{AnswerArrival, DelayEnd, DelayStart, RequestArrival, RequestFailure, RequestTimeout};
use crate::request::{RequestFailedReason, RequestId, RequestRegistry, Requester};

/// An additive latency window injected by a delay fault.
#[derive(Debug, Clone, Serialize)]
pub struct DelayInjection {
    /// Affected service (sends from or to it), or all traffic if `None`.
    pub service: Option<ServiceId>,
    pub baseline: f64,
    pub std_dev: f64,
    #[serde(skip)]
    active: bool,
}

impl DelayInjection {
    pub fn new(service: Option<ServiceId>, baseline: f64, std_dev: f64) -> Self {
        Self {
            service,
            baseline,
            std_dev,
            active: false,
        }
    }

    fn applies_to(&self, from: Option<ServiceId>, to: Option<ServiceId>) -> bool {
        match self.service {
            None => true,
            Some(service) => from == Some(service) || to == Some(service),
        }
    }
}

/// Latency and timeout model shared by all senders.
///
/// Endpoints are services; `None` stands for an external requester.
pub struct Network {
    default_latency: f64,
    default_timeout: f64,
    latencies: HashMap<(ServiceId, ServiceId), f64>,
    service_components: Vec<Option<Id>>,
    injections: Vec<DelayInjection>,
    ctx: SimulationContext,
}

impl Network {
    pub fn new(arch: &Architecture, ctx: SimulationContext) -> Result<Self, ArchitectureError> {
        let config = &arch.network;
        let mut latencies = HashMap::new();
        for entry in &config.latencies {
            let from = arch.service_by_name(&entry.from)?;
            let to = arch.service_by_name(&entry.to)?;
            latencies.insert((from, to), entry.latency);
        }
        Ok(Self {
            default_latency: config.default_latency,
            default_timeout: config.default_timeout,
            latencies,
            service_components: vec![None; arch.services.len()],
            injections: Vec::new(),
            ctx,
        })
    }

    /// Binds a service to its simulation component so that requests can
    /// be routed to it.
    pub fn register_service(&mut self, service: ServiceId, component: Id) {
        self.service_components[service] = Some(component);
    }

    pub fn service_component(&self, service: ServiceId) -> Id {
        self.service_components[service].expect("service not registered with the network")
    }

    fn requester_component(&self, requester: Requester) -> Id {
        match requester {
            Requester::External(id) => id,
            Requester::Instance { service, .. } => self.service_component(service),
        }
    }

    /// Registers a delay injection; returns its index for the
    /// activation events.
    pub fn add_injection(&mut self, injection: DelayInjection) -> usize {
        self.injections.push(injection);
        self.injections.len() - 1
    }

    fn latency(&self, ctx: &SimulationContext, from: Option<ServiceId>, to: Option<ServiceId>) -> f64 {
        let base = match (from, to) {
            (Some(from), Some(to)) => *self.latencies.get(&(from, to)).unwrap_or(&self.default_latency),
            _ => self.default_latency,
        };
        let mut latency = base;
        for injection in &self.injections {
            if injection.active && injection.applies_to(from, to) {
                let delay = if injection.std_dev > 0.0 {
                    let dist = Normal::new(injection.baseline, injection.std_dev).unwrap();
                    ctx.sample_from_distribution(&dist)
                } else {
                    injection.baseline
                };
                latency += delay.max(0.0);
            }
        }
        latency
    }

    fn requester_service(requester: Requester) -> Option<ServiceId> {
        match requester {
            Requester::External(_) => None,
            Requester::Instance { service, .. } => Some(service),
        }
    }

    /// Sends a request towards its target service on behalf of `ctx`
    /// (the sender's context): schedules the arrival and the sender-side
    /// timeout.
    pub fn send_request(&self, ctx: &SimulationContext, registry: &mut RequestRegistry, request: RequestId) {
        let (from, to) = {
            let req = registry.get(request);
            (Self::requester_service(req.requester), req.service)
        };
        let latency = self.latency(ctx, from, Some(to));
        let arrival = ctx.emit(RequestArrival { request }, self.service_component(to), latency);
        let timeout = ctx.emit_self(RequestTimeout { request }, self.default_timeout);
        let req = registry.get_mut(request);
        req.arrival_event = Some(arrival);
        req.timeout_event = Some(timeout);
        log_trace!(ctx, "sent request {} (latency {:.3})", request, latency);
    }

    /// Sends the answer of a completed request back to its requester.
    pub fn send_answer(&self, ctx: &SimulationContext, registry: &mut RequestRegistry, request: RequestId) {
        let (requester, from) = {
            let req = registry.get(request);
            (req.requester, req.handler.map(|(service, _)| service))
        };
        let to = Self::requester_service(requester);
        let latency = self.latency(ctx, from, to);
        let dst = self.requester_component(requester);
        let event = ctx.emit(AnswerArrival { request }, dst, latency);
        registry.get_mut(request).answer_event = Some(event);
    }

    /// Notifies the requester that its request failed. Failure
    /// notifications are local to the sender side and incur no latency.
    pub fn send_failure(
        &self,
        ctx: &SimulationContext,
        registry: &mut RequestRegistry,
        request: RequestId,
        reason: RequestFailedReason,
    ) {
        let requester = registry.get(request).requester;
        ctx.emit_now(RequestFailure { request, reason }, self.requester_component(requester));
    }
}

impl EventHandler for Network {
    fn on(&mut self, event: Event) {
        dispatch!(match event.data {
            DelayStart { injection } => {
                self.injections[injection].active = true;
                log_debug!(self.ctx, "delay injection {} activated", injection);
            }
            DelayEnd { injection } => {
                self.injections[injection].active = false;
                log_debug!(self.ctx, "delay injection {} deactivated", injection);
            }
        })
    }
}
