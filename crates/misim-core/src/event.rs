//! Simulation events.

use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::{clone_trait_object, DynClone};
use serde::ser::Serialize;

use crate::component::Id;

/// Event identifier, assigned sequentially at schedule time.
///
/// Identifiers grow monotonically, so they double as the FIFO
/// tie-breaker between events scheduled for the same instant.
pub type EventId = u64;

/// Trait implemented by event payloads.
///
/// Any `Clone + Serialize` type qualifies automatically. Payloads are
/// downcast back to their concrete type at the destination and remain
/// serializable so the logging layer can render them.
pub trait EventData: Downcast + DynClone + erased_serde::Serialize {}

impl_downcast!(EventData);

clone_trait_object!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + DynClone + 'static> EventData for T {}

/// A time-stamped action to execute.
///
/// Events are plain data: created and enqueued once, dequeued exactly
/// once, never mutated. Execution order is a concern of the pending
/// event map inside the simulation state, not of the event itself, so
/// events carry no comparison logic.
#[derive(Clone)]
pub struct Event {
    /// Unique event identifier, also the insertion sequence number.
    pub id: EventId,
    /// Virtual time of event occurrence.
    pub time: f64,
    /// Identifier of the component that emitted the event.
    pub src: Id,
    /// Identifier of the component the event is destined to.
    pub dst: Id,
    /// Event payload.
    pub data: Box<dyn EventData>,
}
