use std::time::Duration;

use fleetform_config::{OrchestratorConfig, RetryBackoff};

/// Bounded retry schedule for component provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  backoff: RetryBackoff,
  initial_delay: Duration,
  max_delay: Duration,
  max_attempts: u32,
}

impl RetryPolicy {
  pub fn new(
    backoff: RetryBackoff,
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
  ) -> Self {
    Self {
      backoff,
      initial_delay,
      max_delay,
      max_attempts: max_attempts.max(1),
    }
  }

  pub fn from_config(config: &OrchestratorConfig) -> Self {
    Self::new(
      config.retry_backoff,
      Duration::from_millis(config.retry_initial_delay_ms),
      Duration::from_millis(config.retry_max_delay_ms),
      config.max_provision_attempts,
    )
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  /// Delay before the next attempt, after `failed` attempts have failed.
  pub fn delay_after(&self, failed: u32) -> Duration {
    let failed = failed.max(1);
    let delay = match self.backoff {
      RetryBackoff::Constant => self.initial_delay,
      RetryBackoff::Linear => self.initial_delay.saturating_mul(failed),
      RetryBackoff::Exponential => {
        let factor = 2u32.checked_pow(failed - 1).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
      }
    };
    delay.min(self.max_delay)
  }
}
