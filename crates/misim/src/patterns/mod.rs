//! Resilience patterns.
//!
//! Instance-owned patterns (retry, circuit breaker) attach to the
//! request lifecycle as interceptors: the send path runs them outermost
//! first (circuit breaker, then retry), the reply path in reverse.
//! Service-owned patterns (load balancer, autoscaler) act on the
//! instance pool.

mod autoscaler;
mod circuit_breaker;
mod load_balancer;
mod retry;

pub use autoscaler::Autoscaler;
pub use circuit_breaker::CircuitBreaker;
pub use load_balancer::LoadBalancer;
pub use retry::Retry;

use misim_core::SimulationContext;

use crate::request::{RequestFailedReason, RequestId, RequestRegistry};

/// State handed to pattern callbacks.
pub struct PatternContext<'a> {
    pub ctx: &'a SimulationContext,
    pub registry: &'a mut RequestRegistry,
}

/// Verdict of a send-path interceptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SendDecision {
    Proceed,
    /// Fail the request immediately without network traversal.
    Reject(RequestFailedReason),
}

/// Verdict of a reply-path failure interceptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureDecision {
    /// Not handled, pass to the next listener.
    Passthrough,
    /// Re-send the failed dependency after the given delay; stops the
    /// chain.
    Retry { delay: f64 },
    /// Replace the failure reason and pass on (e.g. retry exhaustion).
    Escalate(RequestFailedReason),
}

/// Capability set of an instance-owned pattern. Each callback has a
/// no-op default, so patterns implement only what they intercept.
pub trait InstancePattern {
    /// Intercepts an outgoing dependency request before it reaches the
    /// network.
    fn on_send(&mut self, _pc: &mut PatternContext, _request: RequestId) -> SendDecision {
        SendDecision::Proceed
    }

    /// Observes the successful answer of an outgoing request.
    fn on_result(&mut self, _pc: &mut PatternContext, _request: RequestId) {}

    /// Observes the failure of an outgoing request.
    fn on_failed(
        &mut self,
        _pc: &mut PatternContext,
        _request: RequestId,
        _reason: RequestFailedReason,
    ) -> FailureDecision {
        FailureDecision::Passthrough
    }

    /// Observes the cancellation of an in-flight outgoing request, e.g.
    /// when a sibling dependency failed its parent.
    fn on_canceled(&mut self, _pc: &mut PatternContext, _request: RequestId) {}
}
