use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enums::{FailurePolicy, Quorum, RetryBackoff};
use crate::error::ConfigError;

/// Immutable options for one provisioning run.
///
/// Every field has a default so a blueprint may omit the whole section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  pub fleet_size: usize,
  pub boot_timeout_ms: u64,
  pub failure_policy: FailurePolicy,
  pub quorum: Quorum,
  /// Maximum number of components provisioned at the same time.
  pub provision_concurrency: usize,
  pub max_provision_attempts: u32,
  pub retry_backoff: RetryBackoff,
  pub retry_initial_delay_ms: u64,
  pub retry_max_delay_ms: u64,
  /// Poll interval while waiting for a created resource to become ready.
  pub describe_interval_ms: u64,
  /// How long one attempt may wait for a resource to settle before it
  /// counts as failed.
  pub provision_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      fleet_size: 2,
      boot_timeout_ms: 90 * 60 * 1000,
      failure_policy: FailurePolicy::FailFast,
      quorum: Quorum::All,
      provision_concurrency: 4,
      max_provision_attempts: 3,
      retry_backoff: RetryBackoff::Exponential,
      retry_initial_delay_ms: 1_000,
      retry_max_delay_ms: 30_000,
      describe_interval_ms: 5_000,
      provision_timeout_ms: 30 * 60 * 1000,
    }
  }
}

impl OrchestratorConfig {
  pub fn boot_timeout(&self) -> Duration {
    Duration::from_millis(self.boot_timeout_ms)
  }

  pub fn describe_interval(&self) -> Duration {
    Duration::from_millis(self.describe_interval_ms)
  }

  pub fn provision_timeout(&self) -> Duration {
    Duration::from_millis(self.provision_timeout_ms)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.fleet_size == 0 {
      return Err(ConfigError::invalid("fleet_size", "must be at least 1"));
    }
    if self.provision_concurrency == 0 {
      return Err(ConfigError::invalid(
        "provision_concurrency",
        "must be at least 1",
      ));
    }
    if self.provision_timeout_ms == 0 {
      return Err(ConfigError::invalid(
        "provision_timeout_ms",
        "must be greater than 0",
      ));
    }
    if self.max_provision_attempts == 0 {
      return Err(ConfigError::invalid(
        "max_provision_attempts",
        "must be at least 1",
      ));
    }
    if let Quorum::AtLeast { count } = self.quorum
      && (count == 0 || count > self.fleet_size)
    {
      return Err(ConfigError::invalid(
        "quorum",
        format!(
          "at_least count {} must be between 1 and fleet_size {}",
          count, self.fleet_size
        ),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = OrchestratorConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.boot_timeout(), Duration::from_secs(90 * 60));
  }

  #[test]
  fn test_partial_options_fill_defaults() {
    let config: OrchestratorConfig =
      serde_json::from_str(r#"{ "fleet_size": 4, "failure_policy": "continue" }"#).unwrap();
    assert_eq!(config.fleet_size, 4);
    assert_eq!(config.failure_policy, FailurePolicy::Continue);
    assert_eq!(config.quorum, Quorum::All);
    assert_eq!(config.max_provision_attempts, 3);
  }

  #[test]
  fn test_quorum_larger_than_fleet_is_rejected() {
    let config = OrchestratorConfig {
      fleet_size: 2,
      quorum: Quorum::AtLeast { count: 3 },
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidOption { option, .. }) if option == "quorum"
    ));
  }

  #[test]
  fn test_zero_provision_timeout_is_rejected() {
    let config = OrchestratorConfig {
      provision_timeout_ms: 0,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidOption { option, .. }) if option == "provision_timeout_ms"
    ));
    assert_eq!(
      OrchestratorConfig::default().provision_timeout(),
      Duration::from_secs(30 * 60)
    );
  }

  #[test]
  fn test_zero_fleet_is_rejected() {
    let config = OrchestratorConfig {
      fleet_size: 0,
      ..Default::default()
    };
    assert!(config.validate().is_err());
  }
}
