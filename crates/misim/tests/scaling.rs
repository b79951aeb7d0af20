use misim::architecture::{
    ArchitectureModel, AutoscalerConfig, OperationDescription, PatternDescription, ServiceDescription,
};
use misim::faults::FaultDescription;
use misim::generator::{ArrivalDistribution, LoadGeneratorDescription, LoadProfile};
use misim::reporter::DataValue;
use misim::stats::RequestOutcome;
use misim::{ExperimentSettings, MicroserviceSimulation};

fn model_with(patterns: Vec<PatternDescription>, instances: u32) -> ArchitectureModel {
    ArchitectureModel {
        services: vec![ServiceDescription {
            name: "a".into(),
            capacity: 1.0,
            instances,
            patterns,
            operations: vec![OperationDescription {
                name: "op".into(),
                demand: 1.0,
                dependencies: vec![],
            }],
        }],
        network: Default::default(),
    }
}

fn float_series(sim: &MicroserviceSimulation, series: &str) -> Vec<f64> {
    sim.series(series)
        .iter()
        .map(|point| match point.value {
            DataValue::Float(value) => value,
            ref other => panic!("expected a float datapoint, got {:?}", other),
        })
        .collect()
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
fn autoscaler_scales_up_one_step_per_period() {
    let model = model_with(
        vec![PatternDescription::Autoscaler(AutoscalerConfig {
            period: 1.0,
            low_watermark: 0.2,
            high_watermark: 0.8,
            min_instances: 1,
            max_instances: 3,
            cooldown: 0.0,
        })],
        1,
    );
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 5.0 }).unwrap();
    // a burst of ten requests at t=0 keeps the demand above the high
    // watermark for several periods
    sim.add_generator(&LoadGeneratorDescription {
        name: "burst".into(),
        service: "a".into(),
        operation: "op".into(),
        profile: LoadProfile {
            points: vec![(0.0, 10.0)],
        },
        repeating: false,
        start_offset: 0.0,
        distribution: ArrivalDistribution::Spike,
    })
    .unwrap();
    sim.run();

    // one instance per tick: 1 at start, 2 at the first tick, 3 at the
    // second, never above the maximum
    let counts = float_series(&sim, "S[a]_InstanceCount");
    assert_eq!(counts, vec![1.0, 2.0, 3.0]);
    assert!(counts.iter().all(|&count| count <= 3.0));
    assert_eq!(sim.running_instances("a").unwrap(), 3);
}

#[test]
fn scaling_to_zero_drains_before_shutdown() {
    let model = model_with(vec![], 2);
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 10.0 }).unwrap();
    let requests: Vec<_> = (0..4).map(|_| sim.send_request("a", "op").unwrap()).collect();

    sim.step_until_time(0.5);
    sim.scale_service("a", 0).unwrap();
    let summary = sim.run();

    // no request silently disappears: everything in flight completes
    assert_eq!(summary.successful, 4);
    for request in requests {
        assert!(matches!(sim.outcome(request), RequestOutcome::Completed { .. }));
    }
    // both instances drained through SHUTTING_DOWN into SHUTDOWN
    for instance in ["a_0", "a_1"] {
        let states = label_series(&sim, &format!("I[{}]_State", instance));
        assert_eq!(
            states,
            vec!["CREATED", "STARTING", "RUNNING", "SHUTTING_DOWN", "SHUTDOWN"]
        );
    }
    assert_eq!(sim.running_instances("a").unwrap(), 0);
}

#[test]
fn killed_instances_report_their_state_and_leave_the_pool() {
    let model = model_with(vec![], 2);
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 10.0 }).unwrap();
    sim.add_fault(&FaultDescription::Kill {
        service: "a".into(),
        count: 2,
        at: 1.0,
    })
    .unwrap();
    sim.run();

    assert_eq!(sim.running_instances("a").unwrap(), 0);
    for instance in ["a_0", "a_1"] {
        let states = label_series(&sim, &format!("I[{}]_State", instance));
        assert_eq!(states.last().map(String::as_str), Some("KILLED"));
    }
}

#[test]
fn started_instances_join_the_pool() {
    let model = model_with(vec![], 1);
    let mut sim = MicroserviceSimulation::new(&model, ExperimentSettings { seed: 42, duration: 10.0 }).unwrap();
    sim.add_fault(&FaultDescription::Start {
        service: "a".into(),
        count: 2,
        at: 2.0,
    })
    .unwrap();
    sim.run();

    assert_eq!(sim.running_instances("a").unwrap(), 3);
    let counts = float_series(&sim, "S[a]_InstanceCount");
    assert_eq!(counts, vec![1.0, 3.0]);
}
