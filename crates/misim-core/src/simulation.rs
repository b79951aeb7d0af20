//! Simulation configuration and execution.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::Level::Trace;
use log::{log_enabled, trace};
use serde_json::json;
use serde_type_name::type_name;

use crate::component::Id;
use crate::context::SimulationContext;
use crate::event::Event;
use crate::handler::EventHandler;
use crate::log::{level_tag, log_undelivered_event};
use crate::state::SimulationState;

/// Errors reported by the simulation driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationError {
    /// The simulation was asked to run with no pending events and no stop
    /// time, so no progress can ever be made.
    Deadlock,
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::Deadlock => write!(f, "no pending events and no stop time"),
        }
    }
}

impl std::error::Error for SimulationError {}

/// A discrete-event simulation: virtual clock, pending-event map and
/// the table of registered component handlers.
pub struct Simulation {
    sim_state: Rc<RefCell<SimulationState>>,
    name_to_id: HashMap<String, Id>,
    names: Rc<RefCell<Vec<String>>>,
    handlers: Vec<Option<Rc<RefCell<dyn EventHandler>>>>,
}

impl Simulation {
    /// Creates a new simulation with the specified random seed.
    ///
    /// All random choices made through simulation contexts derive from
    /// this seed, so two runs with identical inputs and seed produce
    /// identical event streams.
    pub fn new(seed: u64) -> Self {
        Self {
            sim_state: Rc::new(RefCell::new(SimulationState::new(seed))),
            name_to_id: HashMap::new(),
            names: Rc::new(RefCell::new(Vec::new())),
            handlers: Vec::new(),
        }
    }

    fn register(&mut self, name: &str) -> Id {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.name_to_id.len() as Id;
        self.name_to_id.insert(name.to_owned(), id);
        self.names.borrow_mut().push(name.to_owned());
        self.handlers.push(None);
        id
    }

    /// Returns the identifier of the component with the given name.
    ///
    /// Panics if no such component was registered.
    pub fn lookup_id(&self, name: &str) -> Id {
        *self.name_to_id.get(name).unwrap()
    }

    /// Returns the name of the component with the given identifier.
    pub fn lookup_name(&self, id: Id) -> String {
        self.names.borrow()[id as usize].clone()
    }

    /// Creates a new simulation context under the specified name.
    pub fn create_context<S>(&mut self, name: S) -> SimulationContext
    where
        S: AsRef<str>,
    {
        SimulationContext::new(
            self.register(name.as_ref()),
            name.as_ref(),
            self.sim_state.clone(),
            self.names.clone(),
        )
    }

    /// Registers the event handler for the component with the specified
    /// name and returns the component identifier.
    ///
    /// Events destined to a component without a handler are logged and
    /// discarded.
    pub fn add_handler<S>(&mut self, name: S, handler: Rc<RefCell<dyn EventHandler>>) -> Id
    where
        S: AsRef<str>,
    {
        let id = self.register(name.as_ref());
        self.handlers[id as usize] = Some(handler);
        id
    }

    /// Removes the event handler of the component with the specified name.
    pub fn remove_handler<S>(&mut self, name: S)
    where
        S: AsRef<str>,
    {
        let id = self.lookup_id(name.as_ref());
        self.handlers[id as usize] = None;
    }

    /// Returns the current virtual time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().now()
    }

    /// Returns the total number of scheduled events, canceled ones
    /// included.
    pub fn event_count(&self) -> u64 {
        self.sim_state.borrow().scheduled_count()
    }

    /// Cancels pending events that satisfy the given predicate.
    pub fn cancel_events<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        self.sim_state.borrow_mut().cancel_where(pred);
    }

    /// Executes the next pending event: advances the clock to its time
    /// and invokes the destination handler.
    ///
    /// Returns `true` if an event was found and `false` if the queue is
    /// empty.
    pub fn step(&mut self) -> bool {
        let next = self.sim_state.borrow_mut().pop_next();
        if let Some(event) = next {
            if log_enabled!(Trace) {
                let src_name = self.lookup_name(event.src);
                let dst_name = self.lookup_name(event.dst);
                trace!(
                    target: &dst_name,
                    "[{:9.3}] [{}] {}: {} from {}",
                    event.time,
                    level_tag(Trace),
                    dst_name,
                    json!({"type": type_name(&event.data).unwrap(), "payload": event.data}),
                    src_name
                );
            }
            match self.handlers.get(event.dst as usize) {
                Some(Some(handler)) => handler.clone().borrow_mut().on(event),
                _ => log_undelivered_event(&event),
            }
            true
        } else {
            false
        }
    }

    /// Performs up to `step_count` steps; stops early when the queue
    /// empties. Returns `true` if more events may be pending.
    pub fn steps(&mut self, step_count: u64) -> bool {
        for _ in 0..step_count {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Steps until the event queue is empty.
    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Steps until no events remain at or before the given time, then
    /// advances the clock to exactly that time.
    ///
    /// Returns `true` if events remain beyond the stop time.
    pub fn step_until_time(&mut self, time: f64) -> bool {
        loop {
            let next = self.sim_state.borrow().next_event_time();
            match next {
                Some(next) if next <= time => {
                    self.step();
                }
                remaining => {
                    self.sim_state.borrow_mut().advance_to(time);
                    return remaining.is_some();
                }
            }
        }
    }

    /// Steps until the caller-supplied predicate returns `true` or the
    /// queue empties, whichever comes first.
    ///
    /// Returns `true` if the predicate stopped the run and `false` if the
    /// simulation ran out of events.
    pub fn step_until<F>(&mut self, mut stop: F) -> bool
    where
        F: FnMut() -> bool,
    {
        while !stop() {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Runs the simulation until no pending events remain.
    ///
    /// Fails with [`SimulationError::Deadlock`] when invoked with an
    /// empty queue, since without a stop time such a run can make no
    /// progress at all.
    pub fn run(&mut self) -> Result<(), SimulationError> {
        if !self.sim_state.borrow().has_pending() {
            return Err(SimulationError::Deadlock);
        }
        self.step_until_no_events();
        Ok(())
    }

    /// Returns a random float in the range `[0, 1)` from the
    /// simulation-wide generator.
    pub fn rand(&mut self) -> f64 {
        self.sim_state.borrow_mut().sample_unit()
    }

    /// Returns a random number in the specified range from the
    /// simulation-wide generator.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.sim_state.borrow_mut().sample_range(range)
    }
}
