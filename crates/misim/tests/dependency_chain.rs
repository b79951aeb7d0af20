use misim::architecture::{
    ArchitectureModel, DependencyDescription, LatencyOverride, NetworkConfig, OperationDescription,
    ServiceDescription,
};
use misim::faults::FaultDescription;
use misim::request::RequestFailedReason;
use misim::stats::RequestOutcome;
use misim::{ExperimentSettings, MicroserviceSimulation};

fn service(name: &str, operation: &str, dependency: Option<(&str, &str)>) -> ServiceDescription {
    ServiceDescription {
        name: name.into(),
        capacity: 1.0,
        instances: 1,
        patterns: vec![],
        operations: vec![OperationDescription {
            name: operation.into(),
            demand: 1.0,
            dependencies: dependency
                .map(|(service, operation)| {
                    vec![DependencyDescription {
                        service: service.into(),
                        operation: operation.into(),
                        probability: 1.0,
                    }]
                })
                .unwrap_or_default(),
        }],
    }
}

fn latency(from: &str, to: &str) -> LatencyOverride {
    LatencyOverride {
        from: from.into(),
        to: to.into(),
        latency: 0.5,
    }
}

fn chain_model() -> ArchitectureModel {
    ArchitectureModel {
        services: vec![
            service("a", "op", Some(("b", "op"))),
            service("b", "op", Some(("c", "op"))),
            service("c", "op", None),
        ],
        network: NetworkConfig {
            default_latency: 0.0,
            default_timeout: 8.0,
            latencies: vec![
                latency("a", "b"),
                latency("b", "a"),
                latency("b", "c"),
                latency("c", "b"),
            ],
        },
    }
}

#[test]
fn answer_time_accumulates_latency_and_work_along_the_chain() {
    let mut sim =
        MicroserviceSimulation::new(&chain_model(), ExperimentSettings { seed: 42, duration: 20.0 }).unwrap();
    let request = sim.send_request("a", "op").unwrap();
    let summary = sim.run();

    // 0 (send) + 0.5 (a->b) + 0.5 (b->c) + 1 (c) + 0.5 (c->b) + 1 (b)
    // + 0.5 (b->a) + 1 (a) = 5.0
    assert_eq!(summary.successful, 1);
    assert_eq!(sim.outcome(request), RequestOutcome::Completed { response_time: 5.0 });
}

#[test]
fn killing_a_mid_chain_service_fails_the_request() {
    let mut sim =
        MicroserviceSimulation::new(&chain_model(), ExperimentSettings { seed: 42, duration: 20.0 }).unwrap();
    sim.add_fault(&FaultDescription::Kill {
        service: "b".into(),
        count: 1,
        at: 1.0,
    })
    .unwrap();
    let request = sim.send_request("a", "op").unwrap();
    let summary = sim.run();

    // b dies while handling a's dependency; the reset connection fails
    // a's request, no answer ever reaches the external requester
    assert_eq!(summary.successful, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        sim.outcome(request),
        RequestOutcome::Failed {
            reason: RequestFailedReason::DependencyNotAvailable,
            at: 1.0
        }
    );

    // the internal request at the dying handler observed the reset
    let reset_children = (0..sim.request_count() as u64)
        .filter(|&id| sim.request(id).failure == Some(RequestFailedReason::ConnectionReset))
        .count();
    assert!(reset_children >= 1);
}

#[test]
fn requests_arriving_after_the_kill_find_no_instance() {
    let mut sim =
        MicroserviceSimulation::new(&chain_model(), ExperimentSettings { seed: 42, duration: 20.0 }).unwrap();
    sim.add_fault(&FaultDescription::Kill {
        service: "b".into(),
        count: 1,
        at: 1.0,
    })
    .unwrap();
    sim.step_until_time(2.0);
    let request = sim.send_request("a", "op").unwrap();
    sim.run();

    // a's dependency request towards b is refused outright
    match sim.outcome(request) {
        RequestOutcome::Failed { reason, at } => {
            assert_eq!(reason, RequestFailedReason::DependencyNotAvailable);
            assert_eq!(at, 2.5);
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    let no_instance_children = (0..sim.request_count() as u64)
        .filter(|&id| sim.request(id).failure == Some(RequestFailedReason::NoInstance))
        .count();
    assert_eq!(no_instance_children, 1);
}
