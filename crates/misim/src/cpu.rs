//! Instance CPU with a pluggable queue discipline.
//!
//! A CPU has `capacity` work units per unit of virtual time and a single
//! active slot: only the head process consumes capacity. Completion is a
//! scheduled event, so zero-demand processes still go through the queue
//! and same-time completions keep submission order.

use std::collections::VecDeque;
use std::rc::Rc;

use misim_core::{EventId, SimulationContext};

use crate::architecture::InstanceId;
use crate::events::ProcessCompletion;
use crate::request::RequestId;

/// The computation representing one request's demand on a CPU.
#[derive(Debug, Clone, Copy)]
pub struct CpuProcess {
    pub request: RequestId,
    pub demand: f64,
}

/// Queue discipline of waiting processes.
pub trait CpuScheduler {
    fn enqueue(&mut self, process: CpuProcess);
    fn dequeue(&mut self) -> Option<CpuProcess>;
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Total remaining demand of all waiting processes.
    fn total_demand(&self) -> f64;
}

/// Work-conserving first-in-first-out discipline, the default.
#[derive(Debug, Default)]
pub struct FifoScheduler {
    queue: VecDeque<CpuProcess>,
}

impl FifoScheduler {
    pub fn new() -> Self {
        Default::default()
    }
}

impl CpuScheduler for FifoScheduler {
    fn enqueue(&mut self, process: CpuProcess) {
        self.queue.push_back(process);
    }

    fn dequeue(&mut self) -> Option<CpuProcess> {
        self.queue.pop_front()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn total_demand(&self) -> f64 {
        self.queue.iter().map(|p| p.demand).sum()
    }
}

struct ActiveProcess {
    process: CpuProcess,
    completion_event: EventId,
    started_at: f64,
}

/// CPU bound to one instance.
pub struct Cpu {
    capacity: f64,
    scheduler: Box<dyn CpuScheduler>,
    active: Option<ActiveProcess>,
    instance: InstanceId,
    ctx: Rc<SimulationContext>,
}

impl Cpu {
    pub fn new(
        capacity: f64,
        instance: InstanceId,
        scheduler: Option<Box<dyn CpuScheduler>>,
        ctx: Rc<SimulationContext>,
    ) -> Self {
        assert!(capacity > 0.0, "CPU capacity must be positive");
        Self {
            capacity,
            scheduler: scheduler.unwrap_or_else(|| Box::new(FifoScheduler::new())),
            active: None,
            instance,
            ctx,
        }
    }

    /// Submits a process; starts it immediately when the CPU is idle,
    /// queues it otherwise.
    pub fn submit(&mut self, process: CpuProcess) {
        if self.active.is_none() {
            self.start(process);
        } else {
            self.scheduler.enqueue(process);
        }
    }

    fn start(&mut self, process: CpuProcess) {
        let delay = process.demand / self.capacity;
        let completion_event = self.ctx.emit_self(
            ProcessCompletion {
                instance: self.instance,
                request: process.request,
            },
            delay,
        );
        self.active = Some(ActiveProcess {
            process,
            completion_event,
            started_at: self.ctx.time(),
        });
    }

    /// Handles a completion event: removes the head process and starts
    /// the next one. Returns the completed request, or `None` for a
    /// stale event after [`clear`](Self::clear).
    pub fn on_completion(&mut self, request: RequestId) -> Option<RequestId> {
        let active = self.active.take()?;
        debug_assert_eq!(active.process.request, request);
        if let Some(next) = self.scheduler.dequeue() {
            self.start(next);
        }
        Some(active.process.request)
    }

    /// Cancels the outstanding completion event and drops all queued
    /// processes. Called only when the instance dies.
    pub fn clear(&mut self) {
        if let Some(active) = self.active.take() {
            self.ctx.cancel_event(active.completion_event);
        }
        self.scheduler.clear();
    }

    /// Fraction of capacity currently in use.
    pub fn current_usage(&self) -> f64 {
        if self.active.is_some() {
            1.0
        } else {
            0.0
        }
    }

    /// Total outstanding demand relative to capacity, i.e. the virtual
    /// time needed to drain the CPU.
    pub fn current_relative_work_demand(&self) -> f64 {
        let active_remaining = match &self.active {
            Some(active) => {
                let done = (self.ctx.time() - active.started_at) * self.capacity;
                (active.process.demand - done).max(0.0)
            }
            None => 0.0,
        };
        (active_remaining + self.scheduler.total_demand()) / self.capacity
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.scheduler.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.scheduler.len() + usize::from(self.active.is_some())
    }
}
