use fleetform_gate::SignalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SequenceError {
  #[error("duplicate step key: {key}")]
  DuplicateKey { key: String },
}

/// Build-time errors substituting placeholders into step payloads.
#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("step '{step}': unknown placeholder '{placeholder}'")]
  UnknownPlaceholder { step: String, placeholder: String },

  #[error("step '{step}': missing value: {message}")]
  MissingValue { step: String, message: String },

  #[error("step '{step}': template error: {message}")]
  Syntax { step: String, message: String },

  #[error(transparent)]
  Sequence(#[from] SequenceError),
}

#[derive(Debug, Error)]
pub enum StateError {
  #[error("state io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("corrupt state for node '{node_id}': {source}")]
  Corrupt {
    node_id: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to encode state: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Why a single step did not succeed.
#[derive(Debug, Error)]
pub enum StepError {
  #[error("exit code {code}{}", stderr_suffix(.stderr))]
  ExitCode { code: i32, stderr: String },

  #[error("terminated by signal{}", stderr_suffix(.stderr))]
  Terminated { stderr: String },

  #[error("failed to start: {0}")]
  Spawn(#[from] std::io::Error),

  #[error("timed out after {ms}ms")]
  Timeout { ms: u64 },

  #[error("{message}")]
  Failed { message: String },
}

impl StepError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }
}

fn stderr_suffix(stderr: &str) -> String {
  if stderr.is_empty() {
    String::new()
  } else {
    format!(": {}", stderr)
  }
}

#[derive(Debug, Error)]
pub enum SequencerError {
  #[error("node '{node_id}': persisted progress does not match the step list (expected '{expected}' completed, found {found:?})")]
  StateMismatch {
    node_id: String,
    expected: String,
    found: Option<String>,
  },

  #[error("node '{node_id}': persisted step index {index} is past the end of {len} steps")]
  IndexOutOfRange {
    node_id: String,
    index: usize,
    len: usize,
  },

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Signal(#[from] SignalError),
}
