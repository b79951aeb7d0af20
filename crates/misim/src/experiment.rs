//! Experiment model: workload plus faults over a bounded duration.

use serde::{Deserialize, Serialize};

use crate::faults::FaultDescription;
use crate::generator::LoadGeneratorDescription;

/// Run-wide settings supplied next to the experiment or scenario.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExperimentSettings {
    pub seed: u64,
    pub duration: f64,
}

/// An experiment: the explicit list of load generators and fault events
/// driving a simulation run. Produced directly by an experiment file or
/// parsed from a scenario description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentModel {
    pub name: String,
    pub duration: f64,
    #[serde(default)]
    pub generators: Vec<LoadGeneratorDescription>,
    #[serde(default)]
    pub faults: Vec<FaultDescription>,
}

impl ExperimentModel {
    pub fn new<S: Into<String>>(name: S, duration: f64) -> Self {
        Self {
            name: name.into(),
            duration,
            generators: Vec::new(),
            faults: Vec::new(),
        }
    }
}
