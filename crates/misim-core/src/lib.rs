#![warn(missing_docs)]
//! Discrete-event simulation kernel used by MiSim.
//!
//! The kernel owns the virtual clock and the event queue. Components are
//! registered under string names, receive dense integer identifiers and
//! interact with the simulation exclusively through [`SimulationContext`]
//! handles: all waiting is expressed by scheduling future events, all
//! mutation of shared simulation state goes through `emit`/`cancel`.
//!
//! Events are executed in strict `(time, id)` order, where the id is a
//! process-wide counter assigned at schedule time. Two events scheduled
//! for the same instant therefore fire in insertion order.

pub mod component;
pub mod context;
pub mod event;
pub mod handler;
pub mod log;
pub mod simulation;
mod state;

pub use component::Id;
pub use context::SimulationContext;
pub use event::{Event, EventData, EventId};
pub use handler::EventHandler;
pub use simulation::{Simulation, SimulationError};
