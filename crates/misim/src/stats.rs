//! Workload-level statistics.

use indexmap::IndexMap;

use crate::request::{RequestFailedReason, RequestId};

/// A sample of f64 observations with basic statistical accessors.
#[derive(Debug, Clone, Default)]
pub struct SampleMetric {
    data: Vec<f64>,
}

impl SampleMetric {
    pub fn add(&mut self, x: f64) {
        self.data.push(x);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        self.sum() / (self.data.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::max)
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }
}

/// Final state of an externally issued request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestOutcome {
    Pending,
    Completed { response_time: f64 },
    Failed { reason: RequestFailedReason, at: f64 },
}

/// Aggregated outcome bookkeeping for all external requests of a run.
#[derive(Debug, Default)]
pub struct WorkloadStats {
    pub successful: u64,
    pub failed: u64,
    pub response_times: SampleMetric,
    outcomes: IndexMap<RequestId, RequestOutcome>,
}

impl WorkloadStats {
    pub fn on_sent(&mut self, request: RequestId) {
        self.outcomes.insert(request, RequestOutcome::Pending);
    }

    pub fn on_completed(&mut self, request: RequestId, response_time: f64) {
        self.successful += 1;
        self.response_times.add(response_time);
        self.outcomes.insert(request, RequestOutcome::Completed { response_time });
    }

    pub fn on_failed(&mut self, request: RequestId, reason: RequestFailedReason, at: f64) {
        self.failed += 1;
        self.outcomes.insert(request, RequestOutcome::Failed { reason, at });
    }

    pub fn outcome(&self, request: RequestId) -> RequestOutcome {
        self.outcomes.get(&request).copied().unwrap_or(RequestOutcome::Pending)
    }

    /// Outcomes of all tracked requests in issue order.
    pub fn outcomes(&self) -> impl Iterator<Item = (RequestId, RequestOutcome)> + '_ {
        self.outcomes.iter().map(|(&id, &outcome)| (id, outcome))
    }
}
