//! MiSim — a discrete-event simulator for microservice architectures.
//!
//! A user supplies an architecture description (services, operations,
//! dependencies, resilience patterns, CPU capacity) and an experiment or
//! scenario (workload generators and fault injections over simulated
//! time). The simulator advances a virtual clock on top of the
//! [`misim_core`] kernel, routes synthetic requests through the service
//! graph, accounts for CPU contention and failure modes, and records
//! deterministic time-series datapoints.

pub mod architecture;
pub mod cpu;
pub mod events;
pub mod experiment;
pub mod faults;
pub mod generator;
pub mod instance;
pub mod network;
pub mod patterns;
pub mod reporter;
pub mod request;
pub mod scenario;
pub mod service;
pub mod simulation;
pub mod stats;

pub use architecture::{ArchitectureError, ArchitectureModel};
pub use experiment::{ExperimentModel, ExperimentSettings};
pub use request::{RequestFailedReason, RequestId};
pub use simulation::{MicroserviceSimulation, RunSummary};
pub use stats::RequestOutcome;
