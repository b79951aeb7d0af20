//! Demand-driven scaling of a service's instance pool.

use crate::architecture::AutoscalerConfig;

/// Compares the mean relative work demand of the running instances
/// against the configured watermarks once per period and proposes a new
/// instance count, one step at a time, within `[min, max]` and honoring
/// the cooldown between adjustments.
pub struct Autoscaler {
    config: AutoscalerConfig,
    last_scaled: Option<f64>,
}

impl Autoscaler {
    pub fn new(config: AutoscalerConfig) -> Self {
        Self {
            config,
            last_scaled: None,
        }
    }

    pub fn period(&self) -> f64 {
        self.config.period
    }

    /// Returns the desired instance count, or `None` when no adjustment
    /// is due.
    pub fn evaluate(&mut self, now: f64, running: u32, mean_demand: f64) -> Option<u32> {
        if let Some(last) = self.last_scaled {
            if now - last < self.config.cooldown {
                return None;
            }
        }
        let target = if mean_demand > self.config.high_watermark && running < self.config.max_instances {
            running + 1
        } else if mean_demand < self.config.low_watermark && running > self.config.min_instances {
            running - 1
        } else {
            return None;
        };
        self.last_scaled = Some(now);
        Some(target)
    }
}
