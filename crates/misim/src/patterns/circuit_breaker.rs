//! Circuit breaker over outgoing requests, tracked per target service.

use std::collections::VecDeque;

use indexmap::IndexMap;
use misim_core::log_debug;

use crate::architecture::{CircuitBreakerConfig, ServiceId};
use crate::request::{RequestFailedReason, RequestId};

use super::{FailureDecision, InstancePattern, PatternContext, SendDecision};

#[derive(Debug, Clone, Copy, PartialEq)]
enum CircuitState {
    Closed,
    Open { until: f64 },
    HalfOpen { probe_in_flight: bool },
}

struct TargetCircuit {
    state: CircuitState,
    // sliding window of most recent outcomes, true = success
    window: VecDeque<bool>,
    in_flight: usize,
}

impl TargetCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            in_flight: 0,
        }
    }

    fn record(&mut self, success: bool, window_size: usize) {
        self.window.push_back(success);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|&&success| !success).count();
        failures as f64 / self.window.len() as f64
    }
}

/// Per-target state machine `Closed -> Open -> HalfOpen -> Closed`.
///
/// While a circuit is open, outgoing requests to that target fail
/// immediately with `CircuitIsOpen` and incur no network traversal.
/// A closed circuit also refuses sends with `RequestVolumeReached`
/// while the in-flight volume to the target exceeds the configured
/// threshold.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    targets: IndexMap<ServiceId, TargetCircuit>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            targets: IndexMap::new(),
        }
    }

    fn circuit(&mut self, target: ServiceId) -> &mut TargetCircuit {
        self.targets.entry(target).or_insert_with(TargetCircuit::new)
    }
}

impl InstancePattern for CircuitBreaker {
    fn on_send(&mut self, pc: &mut PatternContext, request: RequestId) -> SendDecision {
        let target = pc.registry.get(request).service;
        let now = pc.ctx.time();
        let config = self.config;
        let circuit = self.circuit(target);
        match circuit.state {
            CircuitState::Open { until } if now < until => SendDecision::Reject(RequestFailedReason::CircuitIsOpen),
            CircuitState::Open { .. } => {
                // break elapsed, admit a single probe
                circuit.state = CircuitState::HalfOpen { probe_in_flight: true };
                circuit.in_flight += 1;
                SendDecision::Proceed
            }
            CircuitState::HalfOpen { probe_in_flight: true } => {
                SendDecision::Reject(RequestFailedReason::CircuitIsOpen)
            }
            CircuitState::HalfOpen { probe_in_flight: false } => {
                circuit.state = CircuitState::HalfOpen { probe_in_flight: true };
                circuit.in_flight += 1;
                SendDecision::Proceed
            }
            CircuitState::Closed => {
                if circuit.in_flight >= config.request_volume_threshold {
                    SendDecision::Reject(RequestFailedReason::RequestVolumeReached)
                } else {
                    circuit.in_flight += 1;
                    SendDecision::Proceed
                }
            }
        }
    }

    fn on_result(&mut self, pc: &mut PatternContext, request: RequestId) {
        let target = pc.registry.get(request).service;
        let window_size = self.config.rolling_window;
        let circuit = self.circuit(target);
        circuit.in_flight = circuit.in_flight.saturating_sub(1);
        match circuit.state {
            CircuitState::HalfOpen { .. } => {
                // probe succeeded, close the circuit
                circuit.state = CircuitState::Closed;
                circuit.window.clear();
            }
            CircuitState::Closed => circuit.record(true, window_size),
            CircuitState::Open { .. } => {}
        }
    }

    fn on_canceled(&mut self, pc: &mut PatternContext, request: RequestId) {
        let target = pc.registry.get(request).service;
        let now = pc.ctx.time();
        let break_duration = self.config.break_duration;
        let circuit = self.circuit(target);
        circuit.in_flight = circuit.in_flight.saturating_sub(1);
        // a canceled probe yields no verdict, keep the circuit open
        if matches!(circuit.state, CircuitState::HalfOpen { .. }) {
            circuit.state = CircuitState::Open {
                until: now + break_duration,
            };
        }
    }

    fn on_failed(
        &mut self,
        pc: &mut PatternContext,
        request: RequestId,
        reason: RequestFailedReason,
    ) -> FailureDecision {
        // own rejections never traversed the network and are not counted
        if matches!(
            reason,
            RequestFailedReason::CircuitIsOpen | RequestFailedReason::RequestVolumeReached
        ) {
            return FailureDecision::Passthrough;
        }
        let target = pc.registry.get(request).service;
        let now = pc.ctx.time();
        let config = self.config;
        let ctx = pc.ctx;
        let circuit = self.circuit(target);
        circuit.in_flight = circuit.in_flight.saturating_sub(1);
        match circuit.state {
            CircuitState::HalfOpen { .. } => {
                // probe failed, re-open
                circuit.state = CircuitState::Open {
                    until: now + config.break_duration,
                };
            }
            CircuitState::Closed => {
                circuit.record(false, config.rolling_window);
                if circuit.window.len() >= config.rolling_window
                    && circuit.failure_rate() >= config.failure_rate_threshold
                {
                    circuit.state = CircuitState::Open {
                        until: now + config.break_duration,
                    };
                    log_debug!(ctx, "circuit breaker for target service {} tripped", target);
                }
            }
            CircuitState::Open { .. } => {}
        }
        FailureDecision::Passthrough
    }
}
