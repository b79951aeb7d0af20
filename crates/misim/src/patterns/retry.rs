//! Retry with capped exponential backoff.

use indexmap::IndexMap;

use crate::architecture::RetryConfig;
use crate::request::{RequestFailedReason, RequestId};

use super::{FailureDecision, InstancePattern, PatternContext};

/// Re-sends failed dependency requests with exponential backoff until
/// `max_attempts` tries are exhausted.
pub struct Retry {
    config: RetryConfig,
    // failed tries per (parent request, dependency slot)
    attempts: IndexMap<(RequestId, usize), u32>,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: IndexMap::new(),
        }
    }

    fn backoff(&self, failures: u32, jitter: f64) -> f64 {
        let exp = self.config.base_backoff * 2f64.powi(failures as i32 - 1);
        exp.min(self.config.max_backoff) + jitter
    }
}

impl InstancePattern for Retry {
    fn on_result(&mut self, pc: &mut PatternContext, request: RequestId) {
        let req = pc.registry.get(request);
        if let (Some(parent), Some(slot)) = (req.parent, req.dependency_slot) {
            self.attempts.shift_remove(&(parent, slot));
        }
    }

    fn on_canceled(&mut self, pc: &mut PatternContext, request: RequestId) {
        let req = pc.registry.get(request);
        if let (Some(parent), Some(slot)) = (req.parent, req.dependency_slot) {
            self.attempts.shift_remove(&(parent, slot));
        }
    }

    fn on_failed(
        &mut self,
        pc: &mut PatternContext,
        request: RequestId,
        reason: RequestFailedReason,
    ) -> FailureDecision {
        let req = pc.registry.get(request);
        let (parent, slot) = match (req.parent, req.dependency_slot) {
            (Some(parent), Some(slot)) => (parent, slot),
            // only dependency requests are retried
            _ => return FailureDecision::Passthrough,
        };
        match reason {
            // terminal reasons, not retryable
            RequestFailedReason::CircuitIsOpen
            | RequestFailedReason::RequestVolumeReached
            | RequestFailedReason::MaxRetriesReached => {
                self.attempts.shift_remove(&(parent, slot));
                return FailureDecision::Passthrough;
            }
            _ => {}
        }
        let failures = {
            let entry = self.attempts.entry((parent, slot)).or_insert(0);
            *entry += 1;
            *entry
        };
        if failures >= self.config.max_attempts {
            self.attempts.shift_remove(&(parent, slot));
            return FailureDecision::Escalate(RequestFailedReason::MaxRetriesReached);
        }
        let jitter = if self.config.jitter > 0.0 {
            pc.ctx.rand() * self.config.jitter
        } else {
            0.0
        };
        FailureDecision::Retry {
            delay: self.backoff(failures, jitter),
        }
    }
}
