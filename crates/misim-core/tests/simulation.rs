use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use misim_core::{dispatch, Event, EventHandler, Simulation, SimulationError};

#[derive(Clone, Serialize)]
struct Tick {
    tag: u32,
}

struct Recorder {
    fired: Rc<RefCell<Vec<(f64, u32)>>>,
}

impl EventHandler for Recorder {
    fn on(&mut self, event: Event) {
        dispatch!(match event.data {
            Tick { tag } => {
                self.fired.borrow_mut().push((event.time, tag));
            }
        })
    }
}

fn make_recorder(sim: &mut Simulation, name: &str) -> (misim_core::Id, Rc<RefCell<Vec<(f64, u32)>>>) {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let id = sim.add_handler(name, Rc::new(RefCell::new(Recorder { fired: fired.clone() })));
    (id, fired)
}

#[test]
fn events_fire_in_time_order() {
    let mut sim = Simulation::new(123);
    let (dst, fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    ctx.emit(Tick { tag: 3 }, dst, 2.5);
    ctx.emit(Tick { tag: 1 }, dst, 0.5);
    ctx.emit(Tick { tag: 2 }, dst, 1.0);

    sim.step_until_no_events();

    assert_eq!(*fired.borrow(), vec![(0.5, 1), (1.0, 2), (2.5, 3)]);
    assert_eq!(sim.time(), 2.5);
}

#[test]
fn same_time_events_fire_in_insertion_order() {
    let mut sim = Simulation::new(123);
    let (dst, fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    for tag in 0..100 {
        ctx.emit(Tick { tag }, dst, 1.0);
    }
    sim.step_until_no_events();

    let tags: Vec<u32> = fired.borrow().iter().map(|&(_, tag)| tag).collect();
    assert_eq!(tags, (0..100).collect::<Vec<u32>>());
}

#[test]
fn clock_never_decreases() {
    let mut sim = Simulation::new(123);
    let (dst, _fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    ctx.emit(Tick { tag: 0 }, dst, 5.0);
    ctx.emit(Tick { tag: 1 }, dst, 5.0);
    ctx.emit(Tick { tag: 2 }, dst, 7.0);

    let mut last = 0.0;
    while sim.step() {
        assert!(sim.time() >= last);
        last = sim.time();
    }
}

#[test]
#[should_panic(expected = "invalid schedule")]
fn scheduling_into_the_past_panics() {
    let mut sim = Simulation::new(123);
    let ctx = sim.create_context("source");
    ctx.emit(Tick { tag: 0 }, ctx.id(), -1.0);
}

#[test]
fn canceled_event_never_fires() {
    let mut sim = Simulation::new(123);
    let (dst, fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    let keep = ctx.emit(Tick { tag: 1 }, dst, 1.0);
    let drop = ctx.emit(Tick { tag: 2 }, dst, 2.0);
    ctx.cancel_event(drop);
    // cancellation is idempotent
    ctx.cancel_event(drop);
    let _ = keep;

    sim.step_until_no_events();

    assert_eq!(*fired.borrow(), vec![(1.0, 1)]);
    assert_eq!(sim.time(), 1.0);
}

#[test]
fn cancel_by_predicate() {
    let mut sim = Simulation::new(123);
    let (dst, fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    for tag in 0..5 {
        ctx.emit(Tick { tag }, dst, tag as f64);
    }
    sim.cancel_events(|e| e.id < 3);
    sim.step_until_no_events();

    let tags: Vec<u32> = fired.borrow().iter().map(|&(_, tag)| tag).collect();
    assert_eq!(tags, vec![3, 4]);
}

#[test]
fn step_until_time_stops_at_boundary() {
    let mut sim = Simulation::new(123);
    let (dst, fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    ctx.emit(Tick { tag: 1 }, dst, 1.0);
    ctx.emit(Tick { tag: 2 }, dst, 2.0);
    ctx.emit(Tick { tag: 3 }, dst, 9.0);

    let more = sim.step_until_time(5.0);
    assert!(more);
    assert_eq!(fired.borrow().len(), 2);
    // the clock lands exactly on the stop time
    assert_eq!(sim.time(), 5.0);

    let more = sim.step_until_time(10.0);
    assert!(!more);
    assert_eq!(fired.borrow().len(), 3);
    assert_eq!(sim.time(), 10.0);
}

#[test]
fn step_until_predicate() {
    let mut sim = Simulation::new(123);
    let (dst, fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    for tag in 0..10 {
        ctx.emit(Tick { tag }, dst, tag as f64);
    }

    let fired_clone = fired.clone();
    let stopped = sim.step_until(move || fired_clone.borrow().len() >= 4);
    assert!(stopped);
    assert_eq!(fired.borrow().len(), 4);
}

#[test]
fn run_with_empty_queue_is_a_deadlock() {
    let mut sim = Simulation::new(123);
    let _ctx = sim.create_context("source");
    assert_eq!(sim.run(), Err(SimulationError::Deadlock));
}

#[test]
fn run_drains_the_queue() {
    let mut sim = Simulation::new(123);
    let (dst, fired) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");
    ctx.emit(Tick { tag: 7 }, dst, 3.0);

    assert!(sim.run().is_ok());
    assert_eq!(*fired.borrow(), vec![(3.0, 7)]);
}

#[test]
fn seeded_rng_is_reproducible() {
    let draws = |seed: u64| -> Vec<f64> {
        let mut sim = Simulation::new(seed);
        let ctx = sim.create_context("source");
        (0..32).map(|_| ctx.rand()).collect()
    };
    assert_eq!(draws(42), draws(42));
    assert_ne!(draws(42), draws(43));
}
