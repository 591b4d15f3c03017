use std::sync::Arc;

use chrono::Utc;
use fleetform_config::{FailurePolicy, WaitPolicy};
use fleetform_gate::{ReadinessSignal, SignalSink};
use tracing::{info, instrument, warn};

use crate::error::{SequencerError, StepError};
use crate::runner::StepRunner;
use crate::state::{BootstrapState, StateStore};
use crate::step::{StepFailure, StepScript, StepSequence};

/// How one invocation of [`BootstrapSequencer::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerRun {
  /// A step asked to wait for a restart. The next invocation resumes at
  /// `next_step_index`.
  Suspended { next_step_index: usize, key: String },
  /// The bootstrap reached its terminal outcome and the signal was sent.
  Completed(ReadinessSignal),
}

impl SequencerRun {
  pub fn signal(&self) -> Option<&ReadinessSignal> {
    match self {
      SequencerRun::Completed(signal) => Some(signal),
      SequencerRun::Suspended { .. } => None,
    }
  }
}

/// Runs a node's steps in order, checkpointing after every step so a reboot
/// resumes where it left off.
///
/// The process may be torn down at any point between two checkpoints; the
/// next invocation picks up from the persisted state. Exactly one terminal
/// signal is produced per node.
pub struct BootstrapSequencer<R, S> {
  node_id: String,
  runner: R,
  store: S,
  sink: Arc<dyn SignalSink>,
  failure_policy: FailurePolicy,
}

impl<R: StepRunner, S: StateStore> BootstrapSequencer<R, S> {
  pub fn new(node_id: impl Into<String>, runner: R, store: S, sink: Arc<dyn SignalSink>) -> Self {
    Self {
      node_id: node_id.into(),
      runner,
      store,
      sink,
      failure_policy: FailurePolicy::default(),
    }
  }

  pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
    self.failure_policy = policy;
    self
  }

  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[instrument(skip_all, fields(node_id = %self.node_id, steps = steps.len()))]
  pub async fn run(&self, steps: &StepSequence) -> Result<SequencerRun, SequencerError> {
    if let Some(signal) = self.store.outcome(&self.node_id).await? {
      info!(outcome = %signal.outcome, "bootstrap_already_finished");
      return Ok(SequencerRun::Completed(signal));
    }

    let mut state = match self.store.load(&self.node_id).await? {
      Some(state) => {
        info!(next_step_index = state.next_step_index, "bootstrap_resumed");
        state
      }
      None => {
        let state = BootstrapState::new();
        self.store.save(&self.node_id, &state).await?;
        info!("bootstrap_started");
        state
      }
    };

    // A failure was recorded but the node went down before finishing.
    if let Some(detail) = state.last_error.clone() {
      return self.finish(ReadinessSignal::failure(&self.node_id, detail)).await;
    }

    self.check_resume_point(&state, steps)?;

    for (index, step) in steps.iter().enumerate().skip(state.next_step_index) {
      info!(index, step = %step.key(), "step_started");

      match self.execute(step).await {
        Ok(()) => {
          self.checkpoint(&mut state, index, step).await?;
          info!(index, step = %step.key(), "step_completed");

          match step.wait() {
            WaitPolicy::FixedDelay { delay_ms } => {
              if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
              }
            }
            WaitPolicy::WaitForExternalSignal | WaitPolicy::Indefinite => {
              info!(next_step_index = index + 1, step = %step.key(), "bootstrap_suspended");
              return Ok(SequencerRun::Suspended {
                next_step_index: index + 1,
                key: step.key().to_string(),
              });
            }
          }
        }
        Err(err) => {
          let failure = StepFailure {
            key: step.key().to_string(),
            cause: err.to_string(),
          };
          warn!(index, step = %step.key(), cause = %failure.cause, "step_failed");

          match self.failure_policy {
            FailurePolicy::FailFast => {
              state.last_error = Some(failure.to_string());
              state.updated_at = Utc::now();
              self.store.save(&self.node_id, &state).await?;
              return self
                .finish(ReadinessSignal::failure(&self.node_id, failure.to_string()))
                .await;
            }
            FailurePolicy::Continue => {
              state.soft_failures.push(failure.to_string());
              self.checkpoint(&mut state, index, step).await?;
            }
          }
        }
      }
    }

    let detail = if state.soft_failures.is_empty() {
      format!("completed {} step(s)", steps.len())
    } else {
      format!(
        "completed with {} ignored step failure(s): {}",
        state.soft_failures.len(),
        state.soft_failures.join("; ")
      )
    };
    self.finish(ReadinessSignal::success(&self.node_id, detail)).await
  }

  fn check_resume_point(
    &self,
    state: &BootstrapState,
    steps: &StepSequence,
  ) -> Result<(), SequencerError> {
    let next = state.next_step_index;
    if next > steps.len() {
      return Err(SequencerError::IndexOutOfRange {
        node_id: self.node_id.clone(),
        index: next,
        len: steps.len(),
      });
    }
    if next == 0 {
      return Ok(());
    }

    let expected = steps.steps()[next - 1].key();
    if state.last_completed.as_deref() != Some(expected) {
      return Err(SequencerError::StateMismatch {
        node_id: self.node_id.clone(),
        expected: expected.to_string(),
        found: state.last_completed.clone(),
      });
    }
    Ok(())
  }

  async fn execute(&self, step: &StepScript) -> Result<(), StepError> {
    match step.timeout() {
      Some(limit) => match tokio::time::timeout(limit, self.runner.execute(step)).await {
        Ok(result) => result,
        Err(_) => Err(StepError::Timeout {
          ms: limit.as_millis() as u64,
        }),
      },
      None => self.runner.execute(step).await,
    }
  }

  async fn checkpoint(
    &self,
    state: &mut BootstrapState,
    index: usize,
    step: &StepScript,
  ) -> Result<(), SequencerError> {
    state.next_step_index = index + 1;
    state.last_completed = Some(step.key().to_string());
    state.updated_at = Utc::now();
    self.store.save(&self.node_id, state).await?;
    Ok(())
  }

  /// Deliver the terminal signal, then archive it.
  async fn finish(&self, signal: ReadinessSignal) -> Result<SequencerRun, SequencerError> {
    self.sink.deliver(signal.clone()).await?;
    self.store.finish(&self.node_id, &signal).await?;
    info!(outcome = %signal.outcome, detail = %signal.detail, "bootstrap_finished");
    Ok(SequencerRun::Completed(signal))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;
  use std::time::Duration;

  use async_trait::async_trait;
  use fleetform_gate::ChannelSignalSink;

  use super::*;
  use crate::state::MemoryStateStore;

  /// Records executed keys; fails the keys listed in `failing`.
  #[derive(Default)]
  struct ScriptedRunner {
    executed: Mutex<Vec<String>>,
    failing: Vec<String>,
  }

  #[async_trait]
  impl StepRunner for ScriptedRunner {
    async fn execute(&self, step: &StepScript) -> Result<(), StepError> {
      self.executed.lock().unwrap().push(step.key().to_string());
      if step.payload() == "sleep" {
        tokio::time::sleep(Duration::from_secs(3600)).await;
      }
      if self.failing.iter().any(|k| k == step.key()) {
        return Err(StepError::failed("boom"));
      }
      Ok(())
    }
  }

  fn sequence(steps: &[(&str, WaitPolicy)]) -> StepSequence {
    StepSequence::new(
      steps
        .iter()
        .map(|(key, wait)| StepScript::new(*key, "run", *wait))
        .collect(),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_mismatched_checkpoint_is_refused() {
    let store = MemoryStateStore::new();
    let mut state = BootstrapState::new();
    state.next_step_index = 1;
    state.last_completed = Some("old-first-step".into());
    store.save("n1", &state).await.unwrap();

    let (sink, _rx) = ChannelSignalSink::channel();
    let sequencer =
      BootstrapSequencer::new("n1", ScriptedRunner::default(), store, Arc::new(sink));
    let steps = sequence(&[("1", WaitPolicy::default()), ("2", WaitPolicy::default())]);

    let err = sequencer.run(&steps).await.unwrap_err();
    assert!(matches!(err, SequencerError::StateMismatch { ref expected, .. } if expected == "1"));
  }

  #[tokio::test]
  async fn test_index_past_end_is_refused() {
    let store = MemoryStateStore::new();
    let mut state = BootstrapState::new();
    state.next_step_index = 5;
    store.save("n1", &state).await.unwrap();

    let (sink, _rx) = ChannelSignalSink::channel();
    let sequencer =
      BootstrapSequencer::new("n1", ScriptedRunner::default(), store, Arc::new(sink));

    let err = sequencer
      .run(&sequence(&[("1", WaitPolicy::default())]))
      .await
      .unwrap_err();
    assert!(matches!(err, SequencerError::IndexOutOfRange { index: 5, len: 1, .. }));
  }

  #[tokio::test(start_paused = true)]
  async fn test_step_timeout_is_a_failure() {
    let (sink, mut rx) = ChannelSignalSink::channel();
    let sequencer = BootstrapSequencer::new(
      "n1",
      ScriptedRunner::default(),
      MemoryStateStore::new(),
      Arc::new(sink),
    );
    let steps = StepSequence::new(vec![
      StepScript::new("slow", "sleep", WaitPolicy::default()).with_timeout(Duration::from_secs(2)),
    ])
    .unwrap();

    sequencer.run(&steps).await.unwrap();

    let signal = rx.recv().await.unwrap();
    assert!(!signal.is_success());
    assert_eq!(signal.detail, "step slow: timed out after 2000ms");
  }

  #[tokio::test(start_paused = true)]
  async fn test_fixed_delay_sleeps_between_steps() {
    let (sink, _rx) = ChannelSignalSink::channel();
    let sequencer = BootstrapSequencer::new(
      "n1",
      ScriptedRunner::default(),
      MemoryStateStore::new(),
      Arc::new(sink),
    );
    let steps = sequence(&[
      ("1", WaitPolicy::fixed(Duration::from_secs(10))),
      ("2", WaitPolicy::default()),
    ]);

    let started = tokio::time::Instant::now();
    sequencer.run(&steps).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(10));
  }

  #[tokio::test]
  async fn test_recorded_failure_is_redelivered_without_rerunning() {
    let store = MemoryStateStore::new();
    let mut state = BootstrapState::new();
    state.last_error = Some("step 1: boom".into());
    store.save("n1", &state).await.unwrap();

    let (sink, mut rx) = ChannelSignalSink::channel();
    let runner = ScriptedRunner::default();
    let sequencer = BootstrapSequencer::new("n1", runner, store.clone(), Arc::new(sink));

    let run = sequencer
      .run(&sequence(&[("1", WaitPolicy::default())]))
      .await
      .unwrap();

    assert_eq!(run.signal().map(|s| s.detail.as_str()), Some("step 1: boom"));
    assert_eq!(rx.recv().await.unwrap().detail, "step 1: boom");
    assert!(sequencer.runner.executed.lock().unwrap().is_empty());
    assert!(store.outcome("n1").await.unwrap().is_some());
  }
}
