use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use fleetform_config::WaitPolicy;
use serde::{Deserialize, Serialize};

use crate::error::SequenceError;

/// One rendered bootstrap step. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepScript {
  key: String,
  payload: String,
  #[serde(default)]
  wait: WaitPolicy,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  timeout_ms: Option<u64>,
}

impl StepScript {
  pub fn new(key: impl Into<String>, payload: impl Into<String>, wait: WaitPolicy) -> Self {
    Self {
      key: key.into(),
      payload: payload.into(),
      wait,
      timeout_ms: None,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout_ms = Some(timeout.as_millis() as u64);
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn payload(&self) -> &str {
    &self.payload
  }

  pub fn wait(&self) -> WaitPolicy {
    self.wait
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }
}

/// Steps in execution order. Order is exactly the order supplied; keys are
/// never sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<StepScript>", into = "Vec<StepScript>")]
pub struct StepSequence {
  steps: Vec<StepScript>,
}

impl StepSequence {
  pub fn new(steps: Vec<StepScript>) -> Result<Self, SequenceError> {
    let mut seen = HashSet::new();
    for step in &steps {
      if !seen.insert(step.key.as_str()) {
        return Err(SequenceError::DuplicateKey {
          key: step.key.clone(),
        });
      }
    }
    Ok(Self { steps })
  }

  pub fn get(&self, index: usize) -> Option<&StepScript> {
    self.steps.get(index)
  }

  pub fn steps(&self) -> &[StepScript] {
    &self.steps
  }

  pub fn iter(&self) -> impl Iterator<Item = &StepScript> {
    self.steps.iter()
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

impl TryFrom<Vec<StepScript>> for StepSequence {
  type Error = SequenceError;

  fn try_from(steps: Vec<StepScript>) -> Result<Self, Self::Error> {
    Self::new(steps)
  }
}

impl From<StepSequence> for Vec<StepScript> {
  fn from(sequence: StepSequence) -> Self {
    sequence.steps
  }
}

/// A step that did not succeed, as reported in signal details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
  pub key: String,
  pub cause: String,
}

impl fmt::Display for StepFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "step {}: {}", self.key, self.cause)
  }
}
