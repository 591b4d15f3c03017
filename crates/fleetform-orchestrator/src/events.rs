//! Provisioning events and notifiers for observability.
//!
//! Events are emitted during a run so consumers can follow progress, persist
//! it, or stream it to a UI.

use fleetform_config::Outputs;
use fleetform_gate::FleetOutcome;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProvisioningEvent {
  RunStarted {
    run_id: String,
    fleet: String,
  },

  ComponentStarted {
    run_id: String,
    component: String,
  },

  ComponentProvisioned {
    run_id: String,
    component: String,
    outputs: Outputs,
  },

  /// An attempt failed and another one is scheduled after `delay_ms`.
  ComponentRetrying {
    run_id: String,
    component: String,
    attempt: u32,
    delay_ms: u64,
    error: String,
  },

  ComponentFailed {
    run_id: String,
    component: String,
    error: String,
  },

  FleetLaunched {
    run_id: String,
    nodes: Vec<String>,
  },

  NodeLaunchFailed {
    run_id: String,
    node_id: String,
    error: String,
  },

  GateResolved {
    run_id: String,
    outcome: FleetOutcome,
  },

  RunCompleted {
    run_id: String,
    outcome: FleetOutcome,
  },

  RunFailed {
    run_id: String,
    error: String,
  },
}

/// Receives provisioning events.
///
/// The orchestrator calls `notify` for each event; implementations decide
/// what to do with them.
pub trait ProvisioningNotifier: Send + Sync {
  fn notify(&self, event: ProvisioningEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ProvisioningNotifier for NoopNotifier {
  fn notify(&self, _event: ProvisioningEvent) {}
}

/// Sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls provisioning; a run emits a
  // handful of events per component.
  sender: mpsc::UnboundedSender<ProvisioningEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ProvisioningEvent>) -> Self {
    Self { sender }
  }
}

impl ProvisioningNotifier for ChannelNotifier {
  fn notify(&self, event: ProvisioningEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
