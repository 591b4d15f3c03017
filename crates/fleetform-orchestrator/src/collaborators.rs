//! Contracts with the systems the orchestrator drives but never inspects.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleetform_bootstrap::StepSequence;
use fleetform_config::{FailurePolicy, HealthCheckDef, Outputs};
use fleetform_gate::SignalSink;
use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, ParameterError, ProvisionError, RoutingError};

/// What the provisioner is asked to create for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
  /// Component name; creation is idempotent by this name.
  pub component: String,
  pub kind: String,
  pub spec: serde_json::Value,
  /// Outputs of the component's direct dependencies.
  pub inputs: BTreeMap<String, Outputs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedResource {
  pub id: String,
  /// Outputs known at creation time; merged with those reported once ready.
  #[serde(default)]
  pub outputs: Outputs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
  Pending,
  Ready {
    #[serde(default)]
    outputs: Outputs,
  },
  Failed { reason: String },
}

/// Cloud control plane.
#[async_trait]
pub trait CloudProvisioner: Send + Sync {
  async fn create(&self, request: &CreateRequest) -> Result<CreatedResource, ProvisionError>;

  async fn describe(&self, resource_id: &str) -> Result<ResourceStatus, ProvisionError>;
}

/// Parameter and secret storage. Values are only substituted into step
/// payloads.
#[async_trait]
pub trait ParameterStore: Send + Sync {
  async fn get(&self, name: &str) -> Result<Option<String>, ParameterError>;

  async fn put(&self, name: &str, value: &str) -> Result<(), ParameterError>;
}

/// Parameter store backed by a shared map.
#[derive(Debug, Clone, Default)]
pub struct MemoryParameterStore {
  values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryParameterStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self
      .values
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(name.into(), value.into());
    self
  }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
  async fn get(&self, name: &str) -> Result<Option<String>, ParameterError> {
    Ok(
      self
        .values
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned(),
    )
  }

  async fn put(&self, name: &str, value: &str) -> Result<(), ParameterError> {
    self
      .values
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(name.to_string(), value.to_string());
    Ok(())
  }
}

/// Health check installed on the routing endpoint before the fleet is
/// attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
  pub port: u16,
  pub path: String,
  pub healthy_threshold: u32,
  pub unhealthy_threshold: u32,
  pub interval: Duration,
}

impl From<&HealthCheckDef> for HealthCheck {
  fn from(def: &HealthCheckDef) -> Self {
    Self {
      port: def.port,
      path: def.path.clone(),
      healthy_threshold: def.healthy_threshold,
      unhealthy_threshold: def.unhealthy_threshold,
      interval: Duration::from_millis(def.interval_ms),
    }
  }
}

/// Routing endpoint (e.g. a load balancer target group).
#[async_trait]
pub trait RoutingRegistrar: Send + Sync {
  async fn health_check(&self, target: &str, check: &HealthCheck) -> Result<(), RoutingError>;

  async fn attach(&self, target: &str, node_ids: &[String]) -> Result<(), RoutingError>;
}

/// Everything a fleet member needs to boot and report back.
#[derive(Clone)]
pub struct LaunchRequest {
  pub run_id: String,
  pub node_id: String,
  pub index: usize,
  pub steps: StepSequence,
  pub failure_policy: FailurePolicy,
  pub sink: Arc<dyn SignalSink>,
}

/// Starts fleet members. `launch` returns once the member is started; its
/// bootstrap outcome arrives later through the request's sink.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
  async fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError>;
}
