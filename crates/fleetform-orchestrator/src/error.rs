//! Error types for provisioning runs.

use fleetform_bootstrap::TemplateError;
use fleetform_config::ConfigError;
use fleetform_graph::GraphError;
use thiserror::Error;

/// Errors reported by a [`crate::CloudProvisioner`].
#[derive(Debug, Error)]
pub enum ProvisionError {
  /// The control plane call itself failed.
  #[error("provisioning api error: {message}")]
  Api { message: String },

  /// The resource was created but ended up in a failed state.
  #[error("resource {resource_id} failed: {reason}")]
  ResourceFailed { resource_id: String, reason: String },

  /// The resource did not settle within the attempt's time limit.
  #[error("resource {resource_id} still pending after {timeout_ms}ms")]
  ResourceTimedOut { resource_id: String, timeout_ms: u64 },
}

impl ProvisionError {
  pub fn api(message: impl Into<String>) -> Self {
    Self::Api {
      message: message.into(),
    }
  }
}

#[derive(Debug, Error)]
#[error("parameter store error: {message}")]
pub struct ParameterError {
  pub message: String,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct LaunchError {
  pub message: String,
}

impl LaunchError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct RoutingError {
  pub message: String,
}

impl RoutingError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Errors that abort a provisioning run.
///
/// Node failures never show up here; they are part of the fleet outcome.
#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("fleet '{fleet}': {source}")]
  Template {
    fleet: String,
    #[source]
    source: TemplateError,
  },

  #[error("fleet '{fleet}' depends on unknown component '{dependency}'")]
  UnknownFleetDependency { fleet: String, dependency: String },

  #[error("fleet '{fleet}' routes through unknown component '{target}'")]
  UnknownRoutingTarget { fleet: String, target: String },

  #[error("component '{component}' failed after {attempts} attempt(s): {source}")]
  Provision {
    component: String,
    attempts: u32,
    #[source]
    source: ProvisionError,
  },

  #[error("parameter not found: {name}")]
  MissingParameter { name: String },

  #[error(transparent)]
  Parameter(#[from] ParameterError),

  #[error("provisioning run cancelled")]
  Cancelled,

  #[error("provisioning task failed: {message}")]
  Join { message: String },
}
