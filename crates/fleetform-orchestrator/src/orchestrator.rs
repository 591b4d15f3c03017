//! Provisioning orchestrator.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use fleetform_bootstrap::StepSequence;
use fleetform_config::{ComponentDef, FleetDef, OrchestratorConfig, Outputs};
use fleetform_gate::{FleetOutcome, GateHandle, ReadinessSignal};
use fleetform_graph::DependencyGraph;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::collaborators::{
  CloudProvisioner, CreateRequest, CreatedResource, HealthCheck, LaunchRequest, NodeLauncher,
  ParameterStore, ResourceStatus, RoutingRegistrar,
};
use crate::error::{OrchestratorError, ProvisionError};
use crate::events::{NoopNotifier, ProvisioningEvent, ProvisioningNotifier};
use crate::plan::plan;
use crate::retry::RetryPolicy;

/// Result of the routing post-step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RoutingStatus {
  Attached,
  /// No routing configured, or the fleet never became ready.
  Skipped,
  Failed(String),
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningResult {
  pub run_id: String,
  /// Components in creation order.
  pub order: Vec<String>,
  pub components: BTreeMap<String, Outputs>,
  pub nodes: Vec<String>,
  pub fleet: FleetOutcome,
  /// Terminal signals received by the gate, by node id.
  pub signals: Vec<ReadinessSignal>,
  pub routing: RoutingStatus,
}

/// Brings up components in dependency order, launches the fleet and gates
/// on its readiness before exposing it to traffic.
pub struct Orchestrator {
  config: OrchestratorConfig,
  provisioner: Arc<dyn CloudProvisioner>,
  parameters: Arc<dyn ParameterStore>,
  launcher: Arc<dyn NodeLauncher>,
  routing: Arc<dyn RoutingRegistrar>,
  notifier: Arc<dyn ProvisioningNotifier>,
}

impl Orchestrator {
  pub fn new(
    config: OrchestratorConfig,
    provisioner: Arc<dyn CloudProvisioner>,
    parameters: Arc<dyn ParameterStore>,
    launcher: Arc<dyn NodeLauncher>,
    routing: Arc<dyn RoutingRegistrar>,
  ) -> Result<Self, OrchestratorError> {
    config.validate()?;
    Ok(Self {
      config,
      provisioner,
      parameters,
      launcher,
      routing,
      notifier: Arc::new(NoopNotifier),
    })
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ProvisioningNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.config
  }

  /// Provision `graph`, then launch and gate `fleet`.
  ///
  /// Cancelling `cancel` aborts the run until the readiness gate opens;
  /// from then on the run goes to completion.
  #[instrument(
    name = "provisioning_run",
    skip(self, graph, fleet, cancel),
    fields(fleet = %fleet.name)
  )]
  pub async fn run(
    &self,
    mut graph: DependencyGraph,
    fleet: &FleetDef,
    cancel: CancellationToken,
  ) -> Result<ProvisioningResult, OrchestratorError> {
    let run_id = uuid::Uuid::new_v4().to_string();

    info!(run_id = %run_id, fleet = %fleet.name, fleet_size = self.config.fleet_size, "run_started");
    self.notifier.notify(ProvisioningEvent::RunStarted {
      run_id: run_id.clone(),
      fleet: fleet.name.clone(),
    });

    let result = self.run_inner(&run_id, &mut graph, fleet, &cancel).await;

    match &result {
      Ok(result) => {
        info!(run_id = %run_id, outcome = %result.fleet, "run_completed");
        self.notifier.notify(ProvisioningEvent::RunCompleted {
          run_id: run_id.clone(),
          outcome: result.fleet.clone(),
        });
      }
      Err(e) => {
        error!(run_id = %run_id, error = %e, "run_failed");
        self.notifier.notify(ProvisioningEvent::RunFailed {
          run_id: run_id.clone(),
          error: e.to_string(),
        });
      }
    }

    result
  }

  async fn run_inner(
    &self,
    run_id: &str,
    graph: &mut DependencyGraph,
    fleet: &FleetDef,
    cancel: &CancellationToken,
  ) -> Result<ProvisioningResult, OrchestratorError> {
    let plan = plan(graph, fleet)?;

    self.provision_components(run_id, graph, cancel).await?;

    let params = self.load_parameters(fleet).await?;
    let steps = plan.render(graph, fleet, self.config.fleet_size, &params)?;

    if cancel.is_cancelled() {
      warn!(run_id = %run_id, "run cancelled before fleet launch");
      return Err(OrchestratorError::Cancelled);
    }

    let nodes = node_ids(&fleet.name, run_id, self.config.fleet_size);
    let gate = GateHandle::open(
      run_id,
      nodes.iter().cloned(),
      self.config.boot_timeout(),
      self.config.quorum,
    );

    self.launch_fleet(run_id, &gate, &nodes, &steps).await;

    let outcome = gate.wait().await;
    info!(run_id = %run_id, outcome = %outcome, "gate_resolved");
    self.notifier.notify(ProvisioningEvent::GateResolved {
      run_id: run_id.to_string(),
      outcome: outcome.clone(),
    });

    let signals: Vec<ReadinessSignal> = gate.snapshot().received().values().cloned().collect();
    let routing = self.route_fleet(run_id, fleet, &outcome, &signals).await;

    let components = plan
      .order
      .iter()
      .filter_map(|name| {
        graph
          .outputs_of(name)
          .ok()
          .map(|outputs| (name.clone(), outputs.clone()))
      })
      .collect();

    Ok(ProvisioningResult {
      run_id: run_id.to_string(),
      order: plan.order,
      components,
      nodes,
      fleet: outcome,
      signals,
      routing,
    })
  }

  /// Provision every component as soon as its own dependencies are done.
  ///
  /// Each component runs in its own task, bounded by
  /// `provision_concurrency`. Whenever one finishes its outputs are recorded
  /// and any component it unblocked is started.
  async fn provision_components(
    &self,
    run_id: &str,
    graph: &mut DependencyGraph,
    cancel: &CancellationToken,
  ) -> Result<(), OrchestratorError> {
    if cancel.is_cancelled() {
      warn!(run_id = %run_id, "run cancelled");
      return Err(OrchestratorError::Cancelled);
    }

    let semaphore = Arc::new(Semaphore::new(self.config.provision_concurrency));
    let retry = RetryPolicy::from_config(&self.config);
    let mut done: HashSet<String> = HashSet::new();
    let mut started: HashSet<String> = HashSet::new();
    let mut in_flight: JoinSet<Result<(String, Outputs), OrchestratorError>> = JoinSet::new();

    loop {
      let unblocked: Vec<ComponentDef> = graph
        .ready(&done)
        .into_iter()
        .filter(|c| !started.contains(&c.name))
        .cloned()
        .collect();

      for component in unblocked {
        let task = self.provision_task(run_id, graph, &component, retry)?;
        let semaphore = semaphore.clone();
        started.insert(component.name.clone());

        in_flight.spawn(async move {
          let Ok(_permit) = semaphore.acquire_owned().await else {
            return Err(OrchestratorError::Cancelled);
          };
          task.run().await
        });
      }

      let joined = tokio::select! {
        joined = in_flight.join_next() => joined,
        _ = cancel.cancelled() => {
          warn!(run_id = %run_id, "run cancelled during provisioning");
          in_flight.abort_all();
          return Err(OrchestratorError::Cancelled);
        }
      };
      let Some(joined) = joined else {
        break;
      };

      let (name, outputs) = joined.map_err(|e| OrchestratorError::Join {
        message: e.to_string(),
      })??;
      graph.record_outputs(&name, outputs)?;
      done.insert(name);
    }

    Ok(())
  }

  fn provision_task(
    &self,
    run_id: &str,
    graph: &DependencyGraph,
    component: &ComponentDef,
    retry: RetryPolicy,
  ) -> Result<ProvisionTask, OrchestratorError> {
    let inputs = component
      .depends_on
      .iter()
      .map(|dep| -> Result<(String, Outputs), OrchestratorError> {
        Ok((dep.clone(), graph.outputs_of(dep)?.clone()))
      })
      .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(ProvisionTask {
      run_id: run_id.to_string(),
      request: CreateRequest {
        component: component.name.clone(),
        kind: component.kind.clone(),
        spec: component.spec.clone(),
        inputs,
      },
      provisioner: self.provisioner.clone(),
      notifier: self.notifier.clone(),
      retry,
      describe_interval: self.config.describe_interval(),
      provision_timeout: self.config.provision_timeout(),
    })
  }

  async fn load_parameters(
    &self,
    fleet: &FleetDef,
  ) -> Result<BTreeMap<String, String>, OrchestratorError> {
    let mut params = BTreeMap::new();
    for name in &fleet.parameters {
      let value = self
        .parameters
        .get(name)
        .await?
        .ok_or_else(|| OrchestratorError::MissingParameter { name: name.clone() })?;
      params.insert(name.clone(), value);
    }
    Ok(params)
  }

  /// Launch every member concurrently. A failed launch is reported to the
  /// gate as that node's failure.
  async fn launch_fleet(
    &self,
    run_id: &str,
    gate: &GateHandle,
    nodes: &[String],
    steps: &StepSequence,
  ) {
    let launches = nodes.iter().enumerate().map(|(index, node_id)| {
      let request = LaunchRequest {
        run_id: run_id.to_string(),
        node_id: node_id.clone(),
        index,
        steps: steps.clone(),
        failure_policy: self.config.failure_policy,
        sink: Arc::new(gate.clone()),
      };
      async move { (node_id, self.launcher.launch(request).await) }
    });

    for (node_id, result) in futures::future::join_all(launches).await {
      if let Err(e) = result {
        warn!(run_id = %run_id, node_id = %node_id, error = %e, "node_launch_failed");
        self.notifier.notify(ProvisioningEvent::NodeLaunchFailed {
          run_id: run_id.to_string(),
          node_id: node_id.clone(),
          error: e.to_string(),
        });
        gate.report(ReadinessSignal::failure(
          node_id.clone(),
          format!("launch failed: {}", e),
        ));
      }
    }

    info!(run_id = %run_id, nodes = nodes.len(), "fleet_launched");
    self.notifier.notify(ProvisioningEvent::FleetLaunched {
      run_id: run_id.to_string(),
      nodes: nodes.to_vec(),
    });
  }

  /// Health check, then attach the nodes that reported success.
  async fn route_fleet(
    &self,
    run_id: &str,
    fleet: &FleetDef,
    outcome: &FleetOutcome,
    signals: &[ReadinessSignal],
  ) -> RoutingStatus {
    let Some(routing) = &fleet.routing else {
      return RoutingStatus::Skipped;
    };
    if !outcome.is_ready() {
      info!(run_id = %run_id, "fleet not ready, skipping routing");
      return RoutingStatus::Skipped;
    }

    let ready: Vec<String> = signals
      .iter()
      .filter(|s| s.is_success())
      .map(|s| s.node_id.clone())
      .collect();
    let check = HealthCheck::from(&routing.health_check);

    let attached = match self.routing.health_check(&routing.target, &check).await {
      Ok(()) => self.routing.attach(&routing.target, &ready).await,
      Err(e) => Err(e),
    };

    match attached {
      Ok(()) => {
        info!(run_id = %run_id, target = %routing.target, nodes = ready.len(), "fleet_attached");
        RoutingStatus::Attached
      }
      Err(e) => {
        warn!(run_id = %run_id, target = %routing.target, error = %e, "fleet_attach_failed");
        RoutingStatus::Failed(e.to_string())
      }
    }
  }
}

/// Correlation ids for the fleet members, assigned before launch.
fn node_ids(fleet: &str, run_id: &str, size: usize) -> Vec<String> {
  let prefix: String = run_id.chars().take(8).collect();
  (0..size)
    .map(|index| format!("{}-{}-{}", fleet, prefix, index))
    .collect()
}

/// One component's provisioning, owned by a spawned task.
struct ProvisionTask {
  run_id: String,
  request: CreateRequest,
  provisioner: Arc<dyn CloudProvisioner>,
  notifier: Arc<dyn ProvisioningNotifier>,
  retry: RetryPolicy,
  describe_interval: Duration,
  provision_timeout: Duration,
}

impl ProvisionTask {
  async fn run(self) -> Result<(String, Outputs), OrchestratorError> {
    let component = self.request.component.clone();

    info!(run_id = %self.run_id, component = %component, "component_started");
    self.notifier.notify(ProvisioningEvent::ComponentStarted {
      run_id: self.run_id.clone(),
      component: component.clone(),
    });

    let mut resource: Option<CreatedResource> = None;
    let mut attempt = 0;

    loop {
      attempt += 1;
      match self.attempt(&mut resource).await {
        Ok(outputs) => {
          info!(run_id = %self.run_id, component = %component, attempt, "component_provisioned");
          self.notifier.notify(ProvisioningEvent::ComponentProvisioned {
            run_id: self.run_id.clone(),
            component: component.clone(),
            outputs: outputs.clone(),
          });
          return Ok((component, outputs));
        }
        Err(e) if attempt < self.retry.max_attempts() => {
          let delay = self.retry.delay_after(attempt);
          warn!(
            run_id = %self.run_id,
            component = %component,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "component_retrying"
          );
          self.notifier.notify(ProvisioningEvent::ComponentRetrying {
            run_id: self.run_id.clone(),
            component: component.clone(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: e.to_string(),
          });
          tokio::time::sleep(delay).await;
        }
        Err(e) => {
          error!(run_id = %self.run_id, component = %component, attempt, error = %e, "component_failed");
          self.notifier.notify(ProvisioningEvent::ComponentFailed {
            run_id: self.run_id.clone(),
            component: component.clone(),
            error: e.to_string(),
          });
          return Err(OrchestratorError::Provision {
            component,
            attempts: attempt,
            source: e,
          });
        }
      }
    }
  }

  /// Create the resource unless an earlier attempt already did, then poll
  /// until it settles or the attempt times out. A resource that ends up
  /// failed is forgotten so the next attempt creates it again; one that is
  /// still pending is only described again.
  async fn attempt(&self, resource: &mut Option<CreatedResource>) -> Result<Outputs, ProvisionError> {
    let created = match resource.clone() {
      Some(created) => created,
      None => {
        let created = self.provisioner.create(&self.request).await?;
        *resource = Some(created.clone());
        created
      }
    };

    let settled = tokio::time::timeout(self.provision_timeout, self.settle(&created)).await;
    match settled {
      Ok(Ok(outputs)) => Ok(outputs),
      Ok(Err(e)) => {
        if matches!(e, ProvisionError::ResourceFailed { .. }) {
          *resource = None;
        }
        Err(e)
      }
      Err(_) => Err(ProvisionError::ResourceTimedOut {
        resource_id: created.id,
        timeout_ms: self.provision_timeout.as_millis() as u64,
      }),
    }
  }

  async fn settle(&self, created: &CreatedResource) -> Result<Outputs, ProvisionError> {
    loop {
      match self.provisioner.describe(&created.id).await? {
        ResourceStatus::Pending => tokio::time::sleep(self.describe_interval).await,
        ResourceStatus::Ready { outputs } => {
          let mut merged = created.outputs.clone();
          merged.extend(outputs);
          return Ok(merged);
        }
        ResourceStatus::Failed { reason } => {
          return Err(ProvisionError::ResourceFailed {
            resource_id: created.id.clone(),
            reason,
          });
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_node_ids_are_stable_per_run() {
    let ids = node_ids("web", "1a2b3c4d-5e6f-7788-99aa-bbccddeeff00", 3);
    assert_eq!(ids, vec!["web-1a2b3c4d-0", "web-1a2b3c4d-1", "web-1a2b3c4d-2"]);
  }

  #[test]
  fn test_routing_status_json_shape() {
    let json = serde_json::to_value(RoutingStatus::Failed("no targets".into())).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["reason"], "no targets");
  }
}
