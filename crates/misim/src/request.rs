//! Requests, dependency instances and the request arena.
//!
//! All requests of a run live in a single [`RequestRegistry`] arena and
//! reference each other by [`RequestId`]. The request graph is cyclic
//! (parent, dependency slot, child request), so edges are ids rather
//! than owning handles.

use misim_core::{EventId, Id};
use serde::Serialize;

use crate::architecture::{InstanceId, OperationId, ServiceId};

/// Identifier of a request in the registry arena.
pub type RequestId = u64;

/// User-visible failure kinds of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestFailedReason {
    Timeout,
    ConnectionReset,
    CircuitIsOpen,
    RequestVolumeReached,
    MaxRetriesReached,
    DependencyNotAvailable,
    HandlerUnavailable,
    NoInstance,
}

/// The party that issued a request and receives its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Requester {
    /// An external component (load generator or ad-hoc client),
    /// identified by its simulation component id.
    External(Id),
    /// An instance collecting one of its dependencies.
    Instance { service: ServiceId, instance: InstanceId },
}

/// Per-request concretization of one declared dependency.
///
/// Holds the slot for the child request collecting it; at most one child
/// is live at a time — a replacement may only be created after the
/// previous child failed and is being retried.
#[derive(Debug, Clone)]
pub struct DependencyInstance {
    pub service: ServiceId,
    pub operation: OperationId,
    pub child: Option<RequestId>,
    pub satisfied: bool,
}

/// A unit of work flowing through the service graph.
///
/// Identity fields are immutable after creation; progress state mutates
/// as the request moves through the network, a handler and its CPU.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub operation: OperationId,
    /// Service owning the target operation.
    pub service: ServiceId,
    /// CPU demand of the target operation.
    pub demand: f64,
    pub requester: Requester,
    /// Parent request, present for internal requests only.
    pub parent: Option<RequestId>,
    /// Dependency slot of the parent this request collects.
    pub dependency_slot: Option<usize>,
    pub created_at: f64,
    /// Instance that accepted the request.
    pub handler: Option<(ServiceId, InstanceId)>,
    /// Dependencies concretized on first arrival at the handler.
    pub dependencies: Vec<DependencyInstance>,
    pub dependencies_concretized: bool,
    /// CPU computation finished.
    pub computed: bool,
    /// An answer was emitted for this request.
    pub answered: bool,
    pub canceled: bool,
    pub failure: Option<RequestFailedReason>,
    /// Pending network events of this request, canceled when the first
    /// of {arrival, timeout, explicit cancel} wins.
    pub arrival_event: Option<EventId>,
    pub timeout_event: Option<EventId>,
    pub answer_event: Option<EventId>,
}

impl Request {
    pub fn is_internal(&self) -> bool {
        self.parent.is_some()
    }

    /// True when all concretized dependencies returned successfully.
    pub fn are_dependencies_completed(&self) -> bool {
        self.dependencies.iter().all(|dep| dep.satisfied)
    }

    /// True when the request can be answered: every dependency returned
    /// and the CPU finished its computation.
    pub fn is_completed(&self) -> bool {
        self.computed && self.are_dependencies_completed()
    }
}

/// Arena of all requests of a run.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: Vec<Request>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    fn push(&mut self, mut request: Request) -> RequestId {
        let id = self.requests.len() as RequestId;
        request.id = id;
        self.requests.push(request);
        id
    }

    /// Creates a fresh external or root request targeting `operation`.
    pub fn new_request(
        &mut self,
        operation: OperationId,
        service: ServiceId,
        demand: f64,
        requester: Requester,
        time: f64,
    ) -> RequestId {
        self.push(Request {
            id: 0,
            operation,
            service,
            demand,
            requester,
            parent: None,
            dependency_slot: None,
            created_at: time,
            handler: None,
            dependencies: Vec::new(),
            dependencies_concretized: false,
            computed: false,
            answered: false,
            canceled: false,
            failure: None,
            arrival_event: None,
            timeout_event: None,
            answer_event: None,
        })
    }

    /// Creates the internal request collecting dependency `slot` of
    /// `parent` and installs it as the slot's live child.
    ///
    /// A live child may only be replaced after the previous one failed
    /// or was canceled.
    pub fn new_internal_request(
        &mut self,
        parent: RequestId,
        slot: usize,
        demand: f64,
        requester: Requester,
        time: f64,
    ) -> RequestId {
        let dep = self.get(parent).dependencies[slot].clone();
        if let Some(previous) = dep.child {
            let previous = self.get(previous);
            debug_assert!(
                previous.canceled || previous.failure.is_some(),
                "dependency slot already has a live child request"
            );
        }
        let id = self.push(Request {
            id: 0,
            operation: dep.operation,
            service: dep.service,
            demand,
            requester,
            parent: Some(parent),
            dependency_slot: Some(slot),
            created_at: time,
            handler: None,
            dependencies: Vec::new(),
            dependencies_concretized: false,
            computed: false,
            answered: false,
            canceled: false,
            failure: None,
            arrival_event: None,
            timeout_event: None,
            answer_event: None,
        });
        self.get_mut(parent).dependencies[slot].child = Some(id);
        id
    }

    pub fn get(&self, id: RequestId) -> &Request {
        &self.requests[id as usize]
    }

    pub fn get_mut(&mut self, id: RequestId) -> &mut Request {
        &mut self.requests[id as usize]
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Marks dependency `slot` of `parent` as satisfied. Returns true
    /// when this was the last outstanding dependency.
    pub fn notify_dependency_finished(&mut self, parent: RequestId, slot: usize) -> bool {
        let request = self.get_mut(parent);
        request.dependencies[slot].satisfied = true;
        request.are_dependencies_completed()
    }

    /// Cancels the children of `parent` that are still in flight, i.e.
    /// not yet accepted by a handler. Pending network events of the
    /// canceled children are appended to `out_events` for the caller to
    /// cancel in the queue; the canceled child ids are returned.
    ///
    /// Children already executing at a remote handler are left alone:
    /// their answers are dropped as stale on arrival.
    pub fn cancel_open_children(&mut self, parent: RequestId, out_events: &mut Vec<EventId>) -> Vec<RequestId> {
        let children: Vec<RequestId> = self
            .get(parent)
            .dependencies
            .iter()
            .filter_map(|dep| dep.child)
            .collect();
        let mut canceled = Vec::new();
        for child in children {
            let request = self.get_mut(child);
            if request.handler.is_none() && !request.canceled {
                request.canceled = true;
                out_events.extend(request.arrival_event.take());
                out_events.extend(request.timeout_event.take());
                canceled.push(child);
            }
        }
        canceled
    }

    /// Cancels a single in-flight request, collecting its pending
    /// network events. No-op when the request was already accepted by a
    /// handler or canceled before.
    pub fn cancel_in_flight(&mut self, id: RequestId, out_events: &mut Vec<EventId>) {
        let request = self.get_mut(id);
        if request.handler.is_none() && !request.canceled {
            request.canceled = true;
            out_events.extend(request.arrival_event.take());
            out_events.extend(request.timeout_event.take());
        }
    }
}
