use async_trait::async_trait;
use fleetform_bootstrap::{BootstrapSequencer, MemoryStateStore, SequencerRun, StepRunner};
use tracing::{error, info};

use crate::collaborators::{LaunchRequest, NodeLauncher};
use crate::error::LaunchError;

/// Runs each fleet member as a task in this process.
///
/// A suspending step is treated as a reboot: the sequencer is dropped and a
/// fresh one resumes from the shared state store.
#[derive(Debug, Clone, Default)]
pub struct InProcessLauncher<R> {
  runner: R,
  store: MemoryStateStore,
}

impl<R> InProcessLauncher<R> {
  pub fn new(runner: R) -> Self {
    Self {
      runner,
      store: MemoryStateStore::new(),
    }
  }

  pub fn store(&self) -> &MemoryStateStore {
    &self.store
  }
}

#[async_trait]
impl<R: StepRunner + Clone + 'static> NodeLauncher for InProcessLauncher<R> {
  async fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError> {
    let runner = self.runner.clone();
    let store = self.store.clone();

    tokio::spawn(async move {
      let mut boots = 1;
      loop {
        let sequencer = BootstrapSequencer::new(
          request.node_id.clone(),
          runner.clone(),
          store.clone(),
          request.sink.clone(),
        )
        .with_failure_policy(request.failure_policy);

        match sequencer.run(&request.steps).await {
          Ok(SequencerRun::Completed(_)) => break,
          Ok(SequencerRun::Suspended { key, .. }) => {
            boots += 1;
            info!(node_id = %request.node_id, step = %key, boots, "node_rebooting");
          }
          Err(e) => {
            // No signal goes out; the gate times this node out.
            error!(node_id = %request.node_id, error = %e, "node_bootstrap_failed");
            break;
          }
        }
      }
    });

    Ok(())
  }
}
