use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};

// f64 carries no total order of its own, so times are wrapped before
// they may key the pending-event map.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TimeKey(f64);

impl Eq for TimeKey {}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Clock, pending events and the run-wide random number generator.
///
/// Pending events live in a map sorted by `(time, id)`: the first entry
/// is always the next event to execute, and equal times fall back to
/// insertion order. Cancellation removes the entry outright (via a
/// small id-to-time index), so the queue never holds dead events and
/// the head can be inspected without skipping anything — which is what
/// lets a bounded run ask for the next event time before deciding to
/// proceed.
pub struct SimulationState {
    now: f64,
    queue: BTreeMap<(TimeKey, EventId), Event>,
    schedule_times: HashMap<EventId, f64>,
    scheduled_count: u64,
    rng: Pcg64,
}

impl SimulationState {
    pub fn new(seed: u64) -> Self {
        Self {
            now: 0.0,
            queue: BTreeMap::new(),
            schedule_times: HashMap::new(),
            scheduled_count: 0,
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Moves the clock forward without executing anything. Used when a
    /// run is bounded by a stop time beyond the last event.
    pub fn advance_to(&mut self, time: f64) {
        if time > self.now {
            self.now = time;
        }
    }

    pub fn schedule<T>(&mut self, data: T, src: Id, dst: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        // the negated comparison also rejects a NaN delay
        if !(delay >= 0.0) {
            panic!(
                "invalid schedule: event at {:.3} lies before the current time {:.3}",
                self.now + delay,
                self.now
            );
        }
        let id = self.scheduled_count;
        self.scheduled_count += 1;
        let time = self.now + delay;
        self.schedule_times.insert(id, time);
        self.queue.insert(
            (TimeKey(time), id),
            Event {
                id,
                time,
                src,
                dst,
                data: Box::new(data),
            },
        );
        id
    }

    /// Removes and returns the next pending event, advancing the clock
    /// to its time.
    pub fn pop_next(&mut self) -> Option<Event> {
        let ((_, id), event) = self.queue.pop_first()?;
        self.schedule_times.remove(&id);
        self.now = event.time;
        Some(event)
    }

    /// Time of the next pending event, if any. Accurate even in the
    /// presence of cancellations, since canceled events leave the queue
    /// immediately.
    pub fn next_event_time(&self) -> Option<f64> {
        self.queue.keys().next().map(|&(TimeKey(time), _)| time)
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Cancels the event with the given id. Idempotent; already
    /// executed events are left alone.
    pub fn cancel(&mut self, id: EventId) {
        if let Some(time) = self.schedule_times.remove(&id) {
            self.queue.remove(&(TimeKey(time), id));
        }
    }

    /// Cancels every pending event that satisfies the predicate.
    pub fn cancel_where<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        let doomed: Vec<(TimeKey, EventId)> = self
            .queue
            .iter()
            .filter(|(_, event)| pred(event))
            .map(|(&key, _)| key)
            .collect();
        for key in doomed {
            self.schedule_times.remove(&key.1);
            self.queue.remove(&key);
        }
    }

    /// Total number of events scheduled so far, canceled ones included.
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled_count
    }

    pub fn sample_unit(&mut self) -> f64 {
        self.rng.gen()
    }

    pub fn sample_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.rng.gen_range(range)
    }

    pub fn sample_from<T, Dist: Distribution<T>>(&mut self, dist: &Dist) -> T {
        dist.sample(&mut self.rng)
    }
}
