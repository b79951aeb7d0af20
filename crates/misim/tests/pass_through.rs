use misim::architecture::{ArchitectureModel, OperationDescription, ServiceDescription};
use misim::reporter::DataValue;
use misim::stats::RequestOutcome;
use misim::{ExperimentSettings, MicroserviceSimulation};

fn single_service_model() -> ArchitectureModel {
    ArchitectureModel {
        services: vec![ServiceDescription {
            name: "a".into(),
            capacity: 1.0,
            instances: 1,
            patterns: vec![],
            operations: vec![OperationDescription {
                name: "op".into(),
                demand: 1.0,
                dependencies: vec![],
            }],
        }],
        network: Default::default(),
    }
}

fn label_series(sim: &MicroserviceSimulation, series: &str) -> Vec<String> {
    sim.series(series)
        .iter()
        .map(|point| match &point.value {
            DataValue::Label(label) => label.clone(),
            other => panic!("expected a label datapoint, got {:?}", other),
        })
        .collect()
}

#[test]
fn minimal_pass_through() {
    let mut sim = MicroserviceSimulation::new(&single_service_model(), ExperimentSettings { seed: 42, duration: 10.0 })
        .unwrap();
    let request = sim.send_request("a", "op").unwrap();

    let summary = sim.run();

    // one arrival at 0, one CPU completion at 1.0, one answer at 1.0
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.end_time, 10.0);
    assert_eq!(sim.outcome(request), RequestOutcome::Completed { response_time: 1.0 });

    // the instance reported its lifecycle and never left RUNNING
    let states = label_series(&sim, "I[a_0]_State");
    assert_eq!(states, vec!["CREATED", "STARTING", "RUNNING"]);
}

#[test]
fn queued_requests_complete_in_submission_order() {
    let mut sim = MicroserviceSimulation::new(&single_service_model(), ExperimentSettings { seed: 42, duration: 10.0 })
        .unwrap();
    let first = sim.send_request("a", "op").unwrap();
    let second = sim.send_request("a", "op").unwrap();
    let third = sim.send_request("a", "op").unwrap();
    sim.run();

    // FIFO CPU: completions at 1, 2 and 3 time units
    assert_eq!(sim.outcome(first), RequestOutcome::Completed { response_time: 1.0 });
    assert_eq!(sim.outcome(second), RequestOutcome::Completed { response_time: 2.0 });
    assert_eq!(sim.outcome(third), RequestOutcome::Completed { response_time: 3.0 });
}

#[test]
fn completed_request_is_answered_exactly_once() {
    let mut sim = MicroserviceSimulation::new(&single_service_model(), ExperimentSettings { seed: 42, duration: 10.0 })
        .unwrap();
    let request = sim.send_request("a", "op").unwrap();
    sim.run();

    let snapshot = sim.request(request);
    assert!(snapshot.answered);
    assert!(!snapshot.canceled);
    assert_eq!(sim.successful_requests() + sim.failed_requests(), 1);
}
