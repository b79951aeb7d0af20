//! Simulation event payloads.

use serde::Serialize;

use crate::architecture::InstanceId;
use crate::request::{RequestFailedReason, RequestId};

// NETWORK EVENTS //////////////////////////////////////////////////////////

/// A request reaches its target service.
#[derive(Clone, Serialize)]
pub struct RequestArrival {
    pub request: RequestId,
}

/// The answer to a completed request reaches the requester.
#[derive(Clone, Serialize)]
pub struct AnswerArrival {
    pub request: RequestId,
}

/// The request leg exceeded its timeout; fires at the sender.
#[derive(Clone, Serialize)]
pub struct RequestTimeout {
    pub request: RequestId,
}

/// A request failed; fires at the component that issued it.
#[derive(Clone, Serialize)]
pub struct RequestFailure {
    pub request: RequestId,
    pub reason: RequestFailedReason,
}

// INSTANCE EVENTS /////////////////////////////////////////////////////////

/// The CPU of an instance finished computing a request.
#[derive(Clone, Serialize)]
pub struct ProcessCompletion {
    pub instance: InstanceId,
    pub request: RequestId,
}

/// A draining instance handled its last request.
#[derive(Clone, Serialize)]
pub struct InstanceShutdownEnd {
    pub instance: InstanceId,
}

/// Backoff elapsed; re-send the child request of one dependency slot.
#[derive(Clone, Serialize)]
pub struct RetryRequest {
    pub parent: RequestId,
    pub slot: usize,
}

// SERVICE EVENTS //////////////////////////////////////////////////////////

/// Periodic autoscaler evaluation.
#[derive(Clone, Serialize)]
pub struct AutoscalerTick {}

/// Chaos fault: kill the given number of running instances.
#[derive(Clone, Serialize)]
pub struct KillInstances {
    pub count: u32,
}

/// Fault recovery: start the given number of new instances.
#[derive(Clone, Serialize)]
pub struct StartInstances {
    pub count: u32,
}

// WORKLOAD & NETWORK FAULT EVENTS /////////////////////////////////////////

/// Self-scheduled firing of a load generator.
#[derive(Clone, Serialize)]
pub struct GeneratorArrival {}

/// A delay injection window opens.
#[derive(Clone, Serialize)]
pub struct DelayStart {
    pub injection: usize,
}

/// A delay injection window closes.
#[derive(Clone, Serialize)]
pub struct DelayEnd {
    pub injection: usize,
}
