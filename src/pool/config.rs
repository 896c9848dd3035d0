//! Pool configuration.

use std::time::Duration;

use crate::core::{
    DEFAULT_BORROW_TIMEOUT, DEFAULT_EVICTION_INTERVAL, DEFAULT_POOL_IDLE_TIMEOUT,
    DEFAULT_POOL_MAX_IDLE, DEFAULT_POOL_MAX_TOTAL, DEFAULT_POOL_MIN_IDLE,
};

/// Per-key pool bounds and timers.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle connections the eviction sweep keeps warm.
    pub min_idle: usize,

    /// Idle connections kept on return; extras are destroyed.
    pub max_idle: usize,

    /// Live connections (idle plus borrowed).
    pub max_total: usize,

    /// How long `borrow` waits. Also the connect timeout for new connections.
    pub borrow_timeout: Duration,

    /// Idle time after which the sweep destroys a connection.
    pub idle_timeout: Duration,

    /// Period of the eviction sweep.
    pub eviction_interval: Duration,

    /// Never return borrowed connections to the idle stack.
    pub exclusive: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: DEFAULT_POOL_MIN_IDLE,
            max_idle: DEFAULT_POOL_MAX_IDLE,
            max_total: DEFAULT_POOL_MAX_TOTAL,
            borrow_timeout: DEFAULT_BORROW_TIMEOUT,
            idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            exclusive: false,
        }
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder.
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Set the minimum idle count.
    pub fn min_idle(mut self, n: usize) -> Self {
        self.config.min_idle = n;
        self
    }

    /// Set the maximum idle count.
    pub fn max_idle(mut self, n: usize) -> Self {
        self.config.max_idle = n;
        self
    }

    /// Set the maximum live count.
    pub fn max_total(mut self, n: usize) -> Self {
        self.config.max_total = n;
        self
    }

    /// Set the borrow timeout.
    pub fn borrow_timeout(mut self, timeout: Duration) -> Self {
        self.config.borrow_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the eviction period.
    pub fn eviction_interval(mut self, period: Duration) -> Self {
        self.config.eviction_interval = period;
        self
    }

    /// Enable exclusive mode.
    pub fn exclusive(mut self, enabled: bool) -> Self {
        self.config.exclusive = enabled;
        self
    }

    /// Build the configuration. `max_idle` never exceeds `max_total`.
    pub fn build(mut self) -> PoolConfig {
        self.config.max_total = self.config.max_total.max(1);
        self.config.max_idle = self.config.max_idle.min(self.config.max_total);
        self.config.min_idle = self.config.min_idle.min(self.config.max_idle);
        self.config
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
