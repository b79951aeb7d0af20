//! Simulation component identifiers.

/// Identifier of a simulation component.
///
/// Identifiers are assigned sequentially starting from 0 in the order
/// components are registered in the simulation.
pub type Id = u32;
