use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    /// Retry counter ceiling
    pub max_steps: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1200),
            cap: Duration::from_secs(8),
            max_steps: 8,
        }
    }
}

/// Linear-to-cap reconnect delay: `min(base * retry_count, cap)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    retry_count: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retry_count: 0,
        }
    }

    /// Count one more scheduled attempt and return how long to wait for it.
    pub fn next_delay(&mut self) -> Duration {
        self.retry_count = (self.retry_count + 1).min(self.config.max_steps.max(1));
        (self.config.base * self.retry_count).min(self.config.cap)
    }

    /// Called once a connection opens.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}
