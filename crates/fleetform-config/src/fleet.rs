use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::step::StepDef;

/// The fleet of machines brought up once its dependencies are provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetDef {
  pub name: String,
  #[serde(default)]
  pub depends_on: Vec<String>,
  /// Parameter store entries made available to step templates as `params.*`.
  #[serde(default)]
  pub parameters: Vec<String>,
  pub steps: Vec<StepDef>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub routing: Option<RoutingDef>,
}

impl FleetDef {
  /// Check that step keys are unique.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for step in &self.steps {
      if !seen.insert(step.key.as_str()) {
        return Err(ConfigError::DuplicateStepKey {
          key: step.key.clone(),
        });
      }
    }
    Ok(())
  }
}

/// Routing endpoint the fleet is attached to once it is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDef {
  /// Component that owns the routing endpoint, e.g. the load balancer.
  pub target: String,
  pub health_check: HealthCheckDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckDef {
  pub port: u16,
  pub path: String,
  #[serde(default = "default_healthy_threshold")]
  pub healthy_threshold: u32,
  #[serde(default = "default_unhealthy_threshold")]
  pub unhealthy_threshold: u32,
  #[serde(default = "default_interval_ms")]
  pub interval_ms: u64,
}

fn default_healthy_threshold() -> u32 {
  5
}

fn default_unhealthy_threshold() -> u32 {
  2
}

fn default_interval_ms() -> u64 {
  30_000
}
