//! Load generation: arrival profiles and the generator component.
//!
//! A load generator walks a lazy sequence of arrival times derived from
//! a profile of `(time, rate)` points. On each firing it emits external
//! requests towards its target operation and re-schedules itself at the
//! next arrival time. The generator is also the requester of its
//! requests: it receives their answers and failures and records
//! workload statistics.

use std::cell::RefCell;
use std::iter::Peekable;
use std::rc::Rc;

use misim_core::{dispatch, Event, EventHandler, SimulationContext};
use misim_core::log_trace;
use serde::{Deserialize, Serialize};

use crate::architecture::{Architecture, OperationId};
use crate::events::{AnswerArrival, GeneratorArrival, RequestFailure, RequestTimeout};
use crate::network::Network;
use crate::reporter::MultiDataPointReporter;
use crate::request::{RequestFailedReason, RequestId, RequestRegistry, Requester};
use crate::stats::WorkloadStats;

/// How the arrivals of one profile point are placed in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalDistribution {
    /// All `rate` arrivals fire exactly at the point's timestamp.
    #[default]
    Spike,
    /// Arrivals are spread evenly across the interval to the next point.
    Even,
}

/// A load profile: `(time, rate)` points, e.g. read from a Limbo model
/// by an out-of-scope loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadProfile {
    pub points: Vec<(f64, f64)>,
}

/// Everything needed to construct a load generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadGeneratorDescription {
    /// Component name; auto-assigned when empty.
    #[serde(default)]
    pub name: String,
    pub service: String,
    pub operation: String,
    pub profile: LoadProfile,
    /// Wrap around with the last profile timestamp as period.
    #[serde(default)]
    pub repeating: bool,
    #[serde(default)]
    pub start_offset: f64,
    #[serde(default)]
    pub distribution: ArrivalDistribution,
}

/// Lazy sequence of arrival times derived from a profile.
///
/// Each point `(t, r)` contributes `r` (rounded) arrivals; a repeating
/// sequence wraps with the last timestamp as period.
pub struct ArrivalSequence {
    points: Vec<(f64, f64)>,
    distribution: ArrivalDistribution,
    repeating: bool,
    start_offset: f64,
    period: f64,
    cycle: u64,
    index: usize,
    emitted: u64,
}

impl ArrivalSequence {
    pub fn new(
        profile: &LoadProfile,
        distribution: ArrivalDistribution,
        repeating: bool,
        start_offset: f64,
    ) -> Self {
        let mut points = profile.points.clone();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let period = points.last().map(|&(t, _)| t).unwrap_or(0.0);
        Self {
            points,
            distribution,
            repeating,
            start_offset,
            period,
            cycle: 0,
            index: 0,
            emitted: 0,
        }
    }

    pub fn from_description(desc: &LoadGeneratorDescription) -> Self {
        Self::new(&desc.profile, desc.distribution, desc.repeating, desc.start_offset)
    }

    /// An empty sequence, for ad-hoc clients that only send on demand.
    pub fn empty() -> Self {
        Self::new(&LoadProfile::default(), ArrivalDistribution::Spike, false, 0.0)
    }
}

impl Iterator for ArrivalSequence {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        loop {
            if self.index >= self.points.len() {
                if !self.repeating || self.period <= 0.0 {
                    return None;
                }
                self.cycle += 1;
                self.index = 0;
                self.emitted = 0;
            }
            let (time, rate) = self.points[self.index];
            let count = rate.round() as u64;
            if self.emitted >= count {
                self.index += 1;
                self.emitted = 0;
                continue;
            }
            let base = self.start_offset + time + self.cycle as f64 * self.period;
            let arrival = match self.distribution {
                ArrivalDistribution::Spike => base,
                ArrivalDistribution::Even => {
                    let gap = if self.index + 1 < self.points.len() {
                        self.points[self.index + 1].0 - time
                    } else {
                        1.0
                    };
                    base + gap * self.emitted as f64 / count as f64
                }
            };
            self.emitted += 1;
            return Some(arrival);
        }
    }
}

/// Scheduled entity emitting external requests at profile arrival times.
pub struct LoadGenerator {
    name: String,
    target: Option<OperationId>,
    arrivals: Peekable<ArrivalSequence>,
    sent: u64,
    successful: u64,
    failed: u64,
    arch: Rc<Architecture>,
    registry: Rc<RefCell<RequestRegistry>>,
    network: Rc<RefCell<Network>>,
    stats: Rc<RefCell<WorkloadStats>>,
    reporter: MultiDataPointReporter,
    ctx: Rc<SimulationContext>,
}

impl LoadGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        target: Option<OperationId>,
        arrivals: ArrivalSequence,
        arch: Rc<Architecture>,
        registry: Rc<RefCell<RequestRegistry>>,
        network: Rc<RefCell<Network>>,
        stats: Rc<RefCell<WorkloadStats>>,
        reporter: MultiDataPointReporter,
        ctx: Rc<SimulationContext>,
    ) -> Self {
        Self {
            name,
            target,
            arrivals: arrivals.peekable(),
            sent: 0,
            successful: 0,
            failed: 0,
            arch,
            registry,
            network,
            stats,
            reporter,
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedules the first firing; a generator with an empty profile
    /// stays dormant.
    pub fn activate(&mut self) {
        if let Some(&first) = self.arrivals.peek() {
            let delay = (first - self.ctx.time()).max(0.0);
            self.ctx.emit_self(GeneratorArrival {}, delay);
        }
    }

    /// Emits one external request towards the given operation.
    pub fn send_to(&mut self, operation: OperationId) -> RequestId {
        let spec = &self.arch.operations[operation];
        let now = self.ctx.time();
        let mut registry = self.registry.borrow_mut();
        let request = registry.new_request(
            operation,
            spec.service,
            spec.demand,
            Requester::External(self.ctx.id()),
            now,
        );
        self.stats.borrow_mut().on_sent(request);
        self.sent += 1;
        self.reporter.add("RequestsSent", now, self.sent as f64);
        self.network.borrow().send_request(&self.ctx, &mut registry, request);
        log_trace!(self.ctx, "generator {} issued request {}", self.name, request);
        request
    }

    fn on_generator_arrival(&mut self) {
        let now = self.ctx.time();
        let target = self.target.expect("load generator fired without a target operation");
        while let Some(&arrival) = self.arrivals.peek() {
            if arrival <= now + 1e-9 {
                self.arrivals.next();
                self.send_to(target);
            } else {
                self.ctx.emit_self(GeneratorArrival {}, arrival - now);
                break;
            }
        }
    }

    fn on_answer(&mut self, request: RequestId) {
        let now = self.ctx.time();
        let created_at = {
            let mut registry = self.registry.borrow_mut();
            registry.get_mut(request).answer_event = None;
            registry.get(request).created_at
        };
        let response_time = now - created_at;
        self.successful += 1;
        self.stats.borrow_mut().on_completed(request, response_time);
        self.reporter.add("ResponseTimes", now, response_time);
        self.reporter.add("SuccessfulRequests", now, self.successful as f64);
    }

    fn on_failure(&mut self, request: RequestId, reason: RequestFailedReason) {
        let now = self.ctx.time();
        self.failed += 1;
        self.stats.borrow_mut().on_failed(request, reason, now);
        self.reporter.add("FailedRequests", now, self.failed as f64);
    }

    fn on_timeout(&mut self, request: RequestId) {
        {
            let mut registry = self.registry.borrow_mut();
            let req = registry.get_mut(request);
            // the arrival won earlier
            if req.timeout_event.is_none() {
                return;
            }
            req.timeout_event = None;
            req.canceled = true;
            req.failure = Some(RequestFailedReason::Timeout);
            if let Some(arrival) = req.arrival_event.take() {
                self.ctx.cancel_event(arrival);
            }
        }
        self.on_failure(request, RequestFailedReason::Timeout);
    }
}

impl EventHandler for LoadGenerator {
    fn on(&mut self, event: Event) {
        dispatch!(match event.data {
            GeneratorArrival {} => {
                self.on_generator_arrival();
            }
            AnswerArrival { request } => {
                self.on_answer(request);
            }
            RequestFailure { request, reason } => {
                self.on_failure(request, reason);
            }
            RequestTimeout { request } => {
                self.on_timeout(request);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(points: &[(f64, f64)]) -> LoadProfile {
        LoadProfile {
            points: points.to_vec(),
        }
    }

    #[test]
    fn spike_profile_bursts_at_exact_offsets() {
        // two arrivals per integer offset, shifted by the start offset
        let profile = profile(&[(0.0, 2.0), (1.0, 2.0), (2.0, 2.0), (3.0, 2.0), (4.0, 2.0), (5.0, 2.0)]);
        let sequence = ArrivalSequence::new(&profile, ArrivalDistribution::Spike, false, 20.5);
        let arrivals: Vec<f64> = sequence.collect();
        let expected: Vec<f64> = (0..6).flat_map(|i| [20.5 + i as f64, 20.5 + i as f64]).collect();
        assert_eq!(arrivals, expected);
    }

    #[test]
    fn repeating_profile_wraps_with_last_timestamp_as_period() {
        let profile = profile(&[(0.0, 1.0), (2.0, 1.0)]);
        let sequence = ArrivalSequence::new(&profile, ArrivalDistribution::Spike, true, 0.0);
        let arrivals: Vec<f64> = sequence.take(6).collect();
        assert_eq!(arrivals, vec![0.0, 2.0, 2.0, 4.0, 4.0, 6.0]);
    }

    #[test]
    fn even_distribution_spreads_within_the_interval() {
        let profile = profile(&[(0.0, 2.0), (1.0, 1.0)]);
        let sequence = ArrivalSequence::new(&profile, ArrivalDistribution::Even, false, 0.0);
        let arrivals: Vec<f64> = sequence.collect();
        assert_eq!(arrivals, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn unsorted_profiles_are_ordered_by_time() {
        let profile = profile(&[(3.0, 1.0), (1.0, 1.0)]);
        let sequence = ArrivalSequence::new(&profile, ArrivalDistribution::Spike, false, 0.0);
        let arrivals: Vec<f64> = sequence.collect();
        assert_eq!(arrivals, vec![1.0, 3.0]);
    }

    #[test]
    fn non_repeating_sequence_is_finite() {
        let profile = profile(&[(0.0, 3.0)]);
        let sequence = ArrivalSequence::new(&profile, ArrivalDistribution::Spike, false, 0.0);
        assert_eq!(sequence.count(), 3);
    }
}
