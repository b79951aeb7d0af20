//! ATAM-style scenario descriptions.
//!
//! A scenario drives a run through its `stimulus` string: `AND`-joined
//! clauses of the forms `LOAD <profile>` (a `~` prefix makes the
//! workload repeat), `KILL|START|RESTART [service] [n] @time` and
//! `DELAY baseline[+-stddev] ~duration @time`. The `component` field
//! selects the targeted operations; `ALL ENDPOINTS` expands to every
//! operation of the `artifact` service.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::architecture::Architecture;
use crate::experiment::ExperimentModel;
use crate::faults::FaultDescription;
use crate::generator::{ArrivalDistribution, LoadGeneratorDescription, LoadProfile};

/// Errors produced while parsing a scenario stimulus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    MissingField(&'static str),
    UnknownService(String),
    UnknownOperation(String),
    UnknownProfile(String),
    MissingTimeSpec(String),
    MissingDelaySpec(String),
    MissingDurationSpec(String),
    MalformedCommand(String),
    UnknownStimulus(String),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::MissingField(field) => write!(f, "scenario is missing required field '{}'", field),
            ScenarioError::UnknownService(name) => write!(f, "could not find target service '{}'", name),
            ScenarioError::UnknownOperation(name) => write!(f, "could not find target operation '{}'", name),
            ScenarioError::UnknownProfile(name) => write!(f, "could not find load profile '{}'", name),
            ScenarioError::MissingTimeSpec(s) => write!(f, "missing time specification (@...) in '{}'", s),
            ScenarioError::MissingDelaySpec(s) => write!(f, "missing delay specification in '{}'", s),
            ScenarioError::MissingDurationSpec(s) => write!(f, "missing duration specification in '{}'", s),
            ScenarioError::MalformedCommand(s) => write!(
                f,
                "command was not defined correctly (KILL/START/RESTART [<service>] [<#instances>] @<time>): '{}'",
                s
            ),
            ScenarioError::UnknownStimulus(s) => write!(f, "unknown stimulus '{}'", s),
        }
    }
}

impl std::error::Error for ScenarioError {}

/// A scenario description input, as delivered by the parser boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioDescription {
    #[serde(alias = "scenarioName", alias = "experiment_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub artifact: String,
    pub component: String,
    pub stimulus: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub response: String,
    #[serde(default, alias = "response_measures")]
    pub response_measure: HashMap<String, String>,
}

impl ScenarioDescription {
    fn check_state(&self) -> Result<(), ScenarioError> {
        if self.stimulus.trim().is_empty() {
            return Err(ScenarioError::MissingField("stimulus"));
        }
        if self.artifact.trim().is_empty() {
            return Err(ScenarioError::MissingField("artifact"));
        }
        if self.component.trim().is_empty() {
            return Err(ScenarioError::MissingField("component"));
        }
        if self.name.trim().is_empty() {
            return Err(ScenarioError::MissingField("name"));
        }
        Ok(())
    }

    /// Converts the scenario into an experiment model: load generators
    /// for `LOAD` stimuli and fault events for the timed faultloads.
    ///
    /// `profiles` maps profile names referenced by the stimulus to
    /// in-memory load profiles (the profile file reader is an external
    /// collaborator).
    pub fn parse(
        &self,
        arch: &Architecture,
        profiles: &HashMap<String, LoadProfile>,
        duration: f64,
    ) -> Result<ExperimentModel, ScenarioError> {
        self.check_state()?;
        let mut model = ExperimentModel::new(self.name.clone(), duration);

        let normalized = self.stimulus.split_whitespace().collect::<Vec<_>>().join(" ");
        for stimulus in normalized.split("AND") {
            let stimulus = stimulus.trim();
            if let Some(rest) = stimulus.strip_prefix("LOAD") {
                self.parse_workload(arch, profiles, rest, &mut model)?;
            } else {
                self.parse_faultload(arch, stimulus, &mut model)?;
            }
        }
        Ok(model)
    }

    fn parse_workload(
        &self,
        arch: &Architecture,
        profiles: &HashMap<String, LoadProfile>,
        spec: &str,
        model: &mut ExperimentModel,
    ) -> Result<(), ScenarioError> {
        let mut profile_name = spec.trim();
        let repeating = profile_name.starts_with('~');
        if repeating {
            profile_name = profile_name.trim_start_matches('~').trim();
        }
        let profile = profiles
            .get(profile_name)
            .ok_or_else(|| ScenarioError::UnknownProfile(profile_name.to_owned()))?;
        let service = arch
            .service_by_name(&self.artifact)
            .map_err(|_| ScenarioError::UnknownService(self.artifact.clone()))?;

        let operations: Vec<usize> = if self.component == "ALL ENDPOINTS" {
            arch.services[service].operations.clone()
        } else {
            let mut operations = Vec::new();
            for component in self.component.split(',') {
                let component = component.trim();
                let operation = arch
                    .operation_by_name(service, component)
                    .or_else(|_| arch.find_operation(component))
                    .map_err(|_| ScenarioError::UnknownOperation(component.to_owned()))?;
                operations.push(operation);
            }
            operations
        };

        for operation in operations {
            let spec = &arch.operations[operation];
            model.generators.push(LoadGeneratorDescription {
                name: String::new(),
                service: arch.services[spec.service].name.clone(),
                operation: spec.name.clone(),
                profile: profile.clone(),
                repeating,
                start_offset: 0.0,
                distribution: ArrivalDistribution::Spike,
            });
        }
        Ok(())
    }

    fn parse_faultload(
        &self,
        arch: &Architecture,
        stimulus: &str,
        model: &mut ExperimentModel,
    ) -> Result<(), ScenarioError> {
        let at_position = stimulus
            .rfind('@')
            .ok_or_else(|| ScenarioError::MissingTimeSpec(stimulus.to_owned()))?;
        let at: f64 = stimulus[at_position + 1..]
            .trim()
            .parse()
            .map_err(|_| ScenarioError::MissingTimeSpec(stimulus.to_owned()))?;
        let command = stimulus[..at_position].trim();
        let tokens: Vec<&str> = command.split_whitespace().collect();

        match tokens.first() {
            Some(&"KILL") | Some(&"START") | Some(&"RESTART") => {
                let mut service = self.artifact.clone();
                let mut count = u32::MAX;
                match tokens.len() {
                    1 => {}
                    2 => match tokens[1].parse::<u32>() {
                        Ok(n) => count = n,
                        Err(_) => service = tokens[1].to_owned(),
                    },
                    3 => {
                        service = tokens[1].to_owned();
                        count = tokens[2]
                            .parse()
                            .map_err(|_| ScenarioError::MalformedCommand(stimulus.to_owned()))?;
                    }
                    _ => return Err(ScenarioError::MalformedCommand(stimulus.to_owned())),
                }
                arch.service_by_name(&service)
                    .map_err(|_| ScenarioError::UnknownService(service.clone()))?;
                let fault = if tokens[0] == "KILL" {
                    FaultDescription::Kill { service, count, at }
                } else {
                    FaultDescription::Start { service, count, at }
                };
                model.faults.push(fault);
                Ok(())
            }
            Some(&"DELAY") => {
                let delay_spec = tokens
                    .iter()
                    .find(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
                    .ok_or_else(|| ScenarioError::MissingDelaySpec(stimulus.to_owned()))?;
                let (baseline, std_dev) = match delay_spec.split_once("+-") {
                    Some((base, dev)) => (
                        base.parse()
                            .map_err(|_| ScenarioError::MissingDelaySpec(stimulus.to_owned()))?,
                        dev.parse()
                            .map_err(|_| ScenarioError::MissingDelaySpec(stimulus.to_owned()))?,
                    ),
                    None => (
                        delay_spec
                            .parse()
                            .map_err(|_| ScenarioError::MissingDelaySpec(stimulus.to_owned()))?,
                        0.0,
                    ),
                };
                let duration_spec = tokens
                    .iter()
                    .find(|token| token.starts_with('~'))
                    .ok_or_else(|| ScenarioError::MissingDurationSpec(stimulus.to_owned()))?;
                let duration: f64 = duration_spec[1..]
                    .parse()
                    .map_err(|_| ScenarioError::MissingDurationSpec(stimulus.to_owned()))?;
                arch.service_by_name(&self.artifact)
                    .map_err(|_| ScenarioError::UnknownService(self.artifact.clone()))?;
                model.faults.push(FaultDescription::Delay {
                    service: Some(self.artifact.clone()),
                    baseline,
                    std_dev,
                    duration,
                    at,
                });
                Ok(())
            }
            _ => Err(ScenarioError::UnknownStimulus(stimulus.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::{ArchitectureModel, OperationDescription, ServiceDescription};

    fn test_arch() -> Architecture {
        ArchitectureModel {
            services: vec![ServiceDescription {
                name: "frontend".into(),
                capacity: 10.0,
                instances: 1,
                patterns: vec![],
                operations: vec![
                    OperationDescription {
                        name: "list".into(),
                        demand: 1.0,
                        dependencies: vec![],
                    },
                    OperationDescription {
                        name: "buy".into(),
                        demand: 2.0,
                        dependencies: vec![],
                    },
                ],
            }],
            network: Default::default(),
        }
        .resolve()
        .unwrap()
    }

    fn scenario(component: &str, stimulus: &str) -> ScenarioDescription {
        ScenarioDescription {
            name: "test".into(),
            artifact: "frontend".into(),
            component: component.into(),
            stimulus: stimulus.into(),
            ..Default::default()
        }
    }

    fn profiles() -> HashMap<String, LoadProfile> {
        let mut profiles = HashMap::new();
        profiles.insert(
            "peak.csv".to_owned(),
            LoadProfile {
                points: vec![(0.0, 2.0), (1.0, 4.0)],
            },
        );
        profiles
    }

    #[test]
    fn load_stimulus_expands_all_endpoints() {
        let arch = test_arch();
        let model = scenario("ALL ENDPOINTS", "LOAD peak.csv")
            .parse(&arch, &profiles(), 100.0)
            .unwrap();
        assert_eq!(model.generators.len(), 2);
        assert!(!model.generators[0].repeating);
    }

    #[test]
    fn tilde_prefix_makes_the_workload_repeat() {
        let arch = test_arch();
        let model = scenario("list", "LOAD ~peak.csv")
            .parse(&arch, &profiles(), 100.0)
            .unwrap();
        assert_eq!(model.generators.len(), 1);
        assert!(model.generators[0].repeating);
        assert_eq!(model.generators[0].operation, "list");
    }

    #[test]
    fn kill_faultload_with_service_and_count() {
        let arch = test_arch();
        let model = scenario("list", "KILL frontend 2 @30")
            .parse(&arch, &profiles(), 100.0)
            .unwrap();
        match &model.faults[0] {
            FaultDescription::Kill { service, count, at } => {
                assert_eq!(service, "frontend");
                assert_eq!(*count, 2);
                assert_eq!(*at, 30.0);
            }
            other => panic!("unexpected fault {:?}", other),
        }
    }

    #[test]
    fn combined_stimuli_split_on_and() {
        let arch = test_arch();
        let model = scenario("list", "LOAD peak.csv AND RESTART 1 @15")
            .parse(&arch, &profiles(), 100.0)
            .unwrap();
        assert_eq!(model.generators.len(), 1);
        assert!(matches!(model.faults[0], FaultDescription::Start { .. }));
    }

    #[test]
    fn delay_faultload_with_deviation_and_duration() {
        let arch = test_arch();
        let model = scenario("list", "DELAY 0.5+-0.1 ~20 @10")
            .parse(&arch, &profiles(), 100.0)
            .unwrap();
        match &model.faults[0] {
            FaultDescription::Delay {
                baseline,
                std_dev,
                duration,
                at,
                ..
            } => {
                assert_eq!(*baseline, 0.5);
                assert_eq!(*std_dev, 0.1);
                assert_eq!(*duration, 20.0);
                assert_eq!(*at, 10.0);
            }
            other => panic!("unexpected fault {:?}", other),
        }
    }

    #[test]
    fn missing_time_spec_is_rejected() {
        let arch = test_arch();
        let err = scenario("list", "KILL frontend 2")
            .parse(&arch, &profiles(), 100.0)
            .unwrap_err();
        assert!(matches!(err, ScenarioError::MissingTimeSpec(_)));
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let arch = test_arch();
        let err = scenario("list", "LOAD unknown.csv")
            .parse(&arch, &profiles(), 100.0)
            .unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownProfile(_)));
    }
}
