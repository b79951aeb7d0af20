use misim::architecture::{
    ArchitectureModel, CircuitBreakerConfig, DependencyDescription, LatencyOverride, NetworkConfig,
    OperationDescription, PatternDescription, RetryConfig, ServiceDescription,
};
use misim::faults::FaultDescription;
use misim::generator::{ArrivalDistribution, LoadGeneratorDescription, LoadProfile};
use misim::request::RequestFailedReason;
use misim::stats::RequestOutcome;
use misim::{ExperimentSettings, MicroserviceSimulation};

fn two_tier_model(a_patterns: Vec<PatternDescription>, b_instances: u32, network: NetworkConfig) -> ArchitectureModel {
    ArchitectureModel {
        services: vec![
            ServiceDescription {
                name: "a".into(),
                capacity: 1.0,
                instances: 1,
                patterns: a_patterns,
                operations: vec![OperationDescription {
                    name: "op".into(),
                    demand: 1.0,
                    dependencies: vec![DependencyDescription {
                        service: "b".into(),
                        operation: "op".into(),
                        probability: 1.0,
                    }],
                }],
            },
            ServiceDescription {
                name: "b".into(),
                capacity: 1.0,
                instances: b_instances,
                patterns: vec![],
                operations: vec![OperationDescription {
                    name: "op".into(),
                    demand: 1.0,
                    dependencies: vec![],
                }],
            },
        ],
        network,
    }
}

fn external_outcomes(sim: &MicroserviceSimulation) -> Vec<RequestOutcome> {
    (0..sim.request_count() as u64)
        .filter(|&id| sim.request(id).parent.is_none())
        .map(|id| sim.outcome(id))
        .collect()
}

fn failures_with(sim: &MicroserviceSimulation, reason: RequestFailedReason) -> usize {
    (0..sim.request_count() as u64)
        .filter(|&id| sim.request(id).failure == Some(reason))
        .count()
}

#[test]
fn circuit_breaker_opens_after_consecutive_failures() {
    let network = NetworkConfig {
        default_latency: 0.0,
        default_timeout: 8.0,
        latencies: vec![
            LatencyOverride {
                from: "a".into(),
                to: "b".into(),
                latency: 0.5,
            },
            LatencyOverride {
                from: "b".into(),
                to: "a".into(),
                latency: 0.5,
            },
        ],
    };
    let model = two_tier_model(
        vec![PatternDescription::CircuitBreaker(CircuitBreakerConfig {
            rolling_window: 10,
            failure_rate_threshold: 1.0,
            request_volume_threshold: 100,
            break_duration: 10.0,
        })],
        0,
        network,
    );
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 30.0 }).unwrap();
    // one request per second, eleven in total
    sim.add_generator(&LoadGeneratorDescription {
        name: "load".into(),
        service: "a".into(),
        operation: "op".into(),
        profile: LoadProfile {
            points: (0..11).map(|i| (i as f64, 1.0)).collect(),
        },
        repeating: false,
        start_offset: 0.0,
        distribution: ArrivalDistribution::Spike,
    })
    .unwrap();

    let summary = sim.run();
    assert_eq!(summary.failed, 11);

    let outcomes = external_outcomes(&sim);
    assert_eq!(outcomes.len(), 11);
    // the first ten fail after the dependency traversed the network
    for (i, outcome) in outcomes.iter().take(10).enumerate() {
        assert_eq!(
            *outcome,
            RequestOutcome::Failed {
                reason: RequestFailedReason::DependencyNotAvailable,
                at: i as f64 + 0.5
            }
        );
    }
    // the eleventh is rejected by the open circuit at its send time,
    // with zero network latency incurred
    assert_eq!(
        outcomes[10],
        RequestOutcome::Failed {
            reason: RequestFailedReason::DependencyNotAvailable,
            at: 10.0
        }
    );
    assert_eq!(failures_with(&sim, RequestFailedReason::CircuitIsOpen), 1);
    assert_eq!(failures_with(&sim, RequestFailedReason::NoInstance), 10);
}

#[test]
fn retry_exhaustion_escalates_to_max_retries_reached() {
    let model = two_tier_model(
        vec![PatternDescription::Retry(RetryConfig {
            max_attempts: 3,
            base_backoff: 0.5,
            max_backoff: 4.0,
            jitter: 0.0,
        })],
        0,
        Default::default(),
    );
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 30.0 }).unwrap();
    let request = sim.send_request("a", "op").unwrap();
    sim.run();

    // tries at 0, 0.5 and 1.5; the third failure exhausts the budget
    assert_eq!(
        sim.outcome(request),
        RequestOutcome::Failed {
            reason: RequestFailedReason::DependencyNotAvailable,
            at: 1.5
        }
    );
    assert_eq!(failures_with(&sim, RequestFailedReason::MaxRetriesReached), 1);
}

#[test]
fn retry_succeeds_once_the_dependency_recovers() {
    let model = two_tier_model(
        vec![PatternDescription::Retry(RetryConfig {
            max_attempts: 3,
            base_backoff: 0.5,
            max_backoff: 4.0,
            jitter: 0.0,
        })],
        0,
        Default::default(),
    );
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 30.0 }).unwrap();
    sim.add_fault(&FaultDescription::Start {
        service: "b".into(),
        count: 1,
        at: 1.2,
    })
    .unwrap();
    let request = sim.send_request("a", "op").unwrap();
    let summary = sim.run();

    // the third try at 1.5 finds the freshly started instance:
    // 1.5 + 1 (b) + 1 (a) = 3.5
    assert_eq!(summary.successful, 1);
    assert_eq!(sim.outcome(request), RequestOutcome::Completed { response_time: 3.5 });
}

#[test]
fn slow_network_leg_times_out() {
    let network = NetworkConfig {
        default_latency: 0.0,
        default_timeout: 2.0,
        latencies: vec![LatencyOverride {
            from: "a".into(),
            to: "b".into(),
            latency: 5.0,
        }],
    };
    let model = two_tier_model(vec![], 1, network);
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 30.0 }).unwrap();
    let request = sim.send_request("a", "op").unwrap();
    sim.run();

    // the timeout at send_time + 2 wins over the arrival at send_time + 5
    assert_eq!(
        sim.outcome(request),
        RequestOutcome::Failed {
            reason: RequestFailedReason::DependencyNotAvailable,
            at: 2.0
        }
    );
    assert_eq!(failures_with(&sim, RequestFailedReason::Timeout), 1);
}
