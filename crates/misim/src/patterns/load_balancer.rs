//! Instance selection for requests arriving at a service.

use misim_core::SimulationContext;

use crate::architecture::BalancingStrategy;
use crate::instance::{InstanceState, MicroserviceInstance};

/// Maps an incoming request to one of the running instances of a
/// service. Returns the index into the instance pool, or `None` when no
/// instance is running.
pub struct LoadBalancer {
    strategy: BalancingStrategy,
    next_index: usize,
}

impl LoadBalancer {
    pub fn new(strategy: BalancingStrategy) -> Self {
        Self {
            strategy,
            next_index: 0,
        }
    }

    pub fn select(&mut self, ctx: &SimulationContext, instances: &[MicroserviceInstance]) -> Option<usize> {
        let running: Vec<usize> = instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| instance.state() == InstanceState::Running)
            .map(|(index, _)| index)
            .collect();
        if running.is_empty() {
            return None;
        }
        match self.strategy {
            BalancingStrategy::RoundRobin => {
                let pick = running[self.next_index % running.len()];
                self.next_index = self.next_index.wrapping_add(1);
                Some(pick)
            }
            BalancingStrategy::Random => Some(running[ctx.gen_range(0..running.len())]),
            BalancingStrategy::LeastUtilized => running
                .into_iter()
                .min_by(|&a, &b| instances[a].usage().total_cmp(&instances[b].usage())),
        }
    }
}
