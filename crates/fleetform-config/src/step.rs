use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the sequencer does after a step completes successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitPolicy {
  /// Sleep for a fixed delay, then continue with the next step.
  FixedDelay { delay_ms: u64 },
  /// Stop and wait for the process to be restarted externally.
  WaitForExternalSignal,
  /// Stop forever; only a restart (e.g. a reboot issued by the step) resumes.
  Indefinite,
}

impl WaitPolicy {
  pub fn fixed(delay: Duration) -> Self {
    Self::FixedDelay {
      delay_ms: delay.as_millis() as u64,
    }
  }

  /// Whether this policy ends the current invocation of the sequencer.
  pub fn suspends(&self) -> bool {
    matches!(self, Self::WaitForExternalSignal | Self::Indefinite)
  }
}

impl Default for WaitPolicy {
  fn default() -> Self {
    Self::FixedDelay { delay_ms: 0 }
  }
}

/// A bootstrap step before template substitution.
///
/// The payload is a minijinja template; placeholders reference upstream
/// component outputs (`{{ directory.domain_name }}`), parameters
/// (`{{ params.agent_config }}`) or the fleet itself (`{{ fleet.name }}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub key: String,
  pub payload: String,
  #[serde(default)]
  pub wait: WaitPolicy,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

impl StepDef {
  pub fn new(key: impl Into<String>, payload: impl Into<String>, wait: WaitPolicy) -> Self {
    Self {
      key: key.into(),
      payload: payload.into(),
      wait,
      timeout_ms: None,
    }
  }
}
