//! Accessing the simulation from components.

use std::cell::RefCell;
use std::rc::Rc;

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::Distribution;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};
use crate::state::SimulationState;

/// A per-component facade over the shared simulation state.
///
/// Contexts are the only way components interact with the clock, the
/// event queue and the simulation-wide random number generator.
#[derive(Clone)]
pub struct SimulationContext {
    id: Id,
    name: String,
    sim_state: Rc<RefCell<SimulationState>>,
    names: Rc<RefCell<Vec<String>>>,
}

impl SimulationContext {
    pub(crate) fn new(
        id: Id,
        name: &str,
        sim_state: Rc<RefCell<SimulationState>>,
        names: Rc<RefCell<Vec<String>>>,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            sim_state,
            names,
        }
    }

    /// Returns the identifier of the component owning this context.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the name of the component owning this context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current virtual time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().now()
    }

    /// Returns a random float in the range `[0, 1)` from the
    /// simulation-wide generator.
    pub fn rand(&self) -> f64 {
        self.sim_state.borrow_mut().sample_unit()
    }

    /// Returns a random number in the specified range from the
    /// simulation-wide generator.
    pub fn gen_range<T, R>(&self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.sim_state.borrow_mut().sample_range(range)
    }

    /// Samples a random value from the specified distribution using the
    /// simulation-wide generator.
    pub fn sample_from_distribution<T, Dist: Distribution<T>>(&self, dist: &Dist) -> T {
        self.sim_state.borrow_mut().sample_from(dist)
    }

    /// Schedules an event with the given payload and destination after
    /// `delay` units of virtual time. Returns the event identifier.
    ///
    /// Panics if `delay` is negative: scheduling into the past is a
    /// programmer error.
    pub fn emit<T>(&self, data: T, dst: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().schedule(data, self.id, dst, delay)
    }

    /// Schedules an event for the current instant.
    ///
    /// The event still goes through the queue, so same-time ordering
    /// guarantees apply.
    pub fn emit_now<T>(&self, data: T, dst: Id) -> EventId
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().schedule(data, self.id, dst, 0.0)
    }

    /// Schedules an event for this component itself after `delay`.
    pub fn emit_self<T>(&self, data: T, delay: f64) -> EventId
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().schedule(data, self.id, self.id, delay)
    }

    /// Schedules an event for this component itself at the current
    /// instant.
    pub fn emit_self_now<T>(&self, data: T) -> EventId
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().schedule(data, self.id, self.id, 0.0)
    }

    /// Schedules an event on behalf of another source component.
    pub fn emit_as<T>(&self, data: T, src: Id, dst: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().schedule(data, src, dst, delay)
    }

    /// Cancels the pending event with the given identifier.
    ///
    /// Cancellation is idempotent; a canceled event never invokes its
    /// handler. Already processed events cannot be canceled.
    pub fn cancel_event(&self, id: EventId) {
        self.sim_state.borrow_mut().cancel(id);
    }

    /// Cancels pending events that satisfy the given predicate.
    pub fn cancel_events<F>(&self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        self.sim_state.borrow_mut().cancel_where(pred);
    }

    /// Returns the name of the component with the given identifier.
    pub fn lookup_name(&self, id: Id) -> String {
        self.names.borrow()[id as usize].clone()
    }
}
