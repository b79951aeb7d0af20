//! Fault descriptions: single-shot chaos events injected into a run.

use serde::{Deserialize, Serialize};

/// A scheduled fault. `Kill` and `Start` mutate a service's instance
/// pool, `Delay` opens an additive latency window on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultDescription {
    /// Kill `count` running instances of `service` at time `at`,
    /// chosen uniformly at random. Killed instances are not respawned.
    Kill { service: String, count: u32, at: f64 },
    /// Start `count` fresh instances of `service` at time `at`.
    Start { service: String, count: u32, at: f64 },
    /// Inject `N(baseline, std_dev)` extra latency on traffic from or to
    /// `service` (all traffic when `None`) during `[at, at + duration]`.
    Delay {
        #[serde(default)]
        service: Option<String>,
        baseline: f64,
        #[serde(default)]
        std_dev: f64,
        duration: f64,
        at: f64,
    },
}
