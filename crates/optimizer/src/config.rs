use std::time::Duration;

use crate::{OptimizerError, Result};

/// Tunables of the optimizer.
///
/// None of the defaults is load bearing for correctness. They shape how
/// fast the optimizer reacts, not what it converges to.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// EMA smoothing factor for throughput samples, in (0, 1)
    pub ema_alpha: f64,
    /// Minimum time between decisions when neither success rate nor EMA moved
    pub steady_interval: Duration,
    /// Upper bound on streams per transfer, also used for the queue cap
    pub max_streams_per_file: u32,

    /// Success-rate thresholds, in percent
    pub low_success_rate: f64,
    pub base_success_rate: f64,

    pub increase_step: u32,
    /// Increase step used by links in aggressive mode
    pub increase_aggressive_step: u32,
    pub decrease_step: u32,

    /// Default minimum connections of a wide-area link
    pub default_min_active: u32,
    /// Default minimum connections of a link inside one site
    pub default_lan_active: u32,
    /// Connection ceiling of a storage endpoint without one configured
    pub global_max_per_storage: u32,
    /// Connection ceiling of a link without one configured, 0 = unlimited
    pub global_max_per_link: u32,

    /// Number of links evaluated concurrently
    pub worker_pool_size: usize,
    /// Cycles a link may go unseen before its previous state is dropped
    pub max_idle_cycles: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.2,
            steady_interval: Duration::from_secs(60),
            max_streams_per_file: 10,

            low_success_rate: 97.0,
            base_success_rate: 96.0,

            increase_step: 1,
            increase_aggressive_step: 2,
            decrease_step: 1,

            default_min_active: 2,
            default_lan_active: 10,
            global_max_per_storage: 200,
            global_max_per_link: 0,

            worker_pool_size: 10,
            max_idle_cycles: 10,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.ema_alpha > 0.0 && self.ema_alpha < 1.0) {
            return Err(error_stack::report!(OptimizerError::invalid_config(
                "ema_alpha must be in (0, 1)"
            )));
        }
        for (name, rate) in [
            ("low_success_rate", self.low_success_rate),
            ("base_success_rate", self.base_success_rate),
        ] {
            if !(0.0..=100.0).contains(&rate) {
                return Err(error_stack::report!(OptimizerError::invalid_config(
                    format!("{name} must be in [0, 100], got {rate}")
                )));
            }
        }
        if self.increase_step == 0 || self.increase_aggressive_step == 0 || self.decrease_step == 0
        {
            return Err(error_stack::report!(OptimizerError::invalid_config(
                "increase and decrease steps must be positive"
            )));
        }
        if self.max_streams_per_file == 0 {
            return Err(error_stack::report!(OptimizerError::invalid_config(
                "max_streams_per_file must be positive"
            )));
        }
        if self.default_min_active == 0 || self.default_lan_active == 0 {
            return Err(error_stack::report!(OptimizerError::invalid_config(
                "default minimum connections must be positive"
            )));
        }
        if self.worker_pool_size == 0 {
            return Err(error_stack::report!(OptimizerError::invalid_config(
                "worker_pool_size must be positive"
            )));
        }
        Ok(())
    }

    /// Increase step for a link in the given mode.
    pub fn increase_step_for(&self, mode: crate::OptimizerMode) -> u32 {
        match mode {
            crate::OptimizerMode::Aggressive => self.increase_aggressive_step,
            _ => self.increase_step,
        }
    }
}
