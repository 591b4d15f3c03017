use serde::{Deserialize, Serialize};

/// What a node does when one of its bootstrap steps fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Abort the remaining steps and report failure.
  #[default]
  FailFast,
  /// Record the failure, keep going, and list it in the terminal detail.
  Continue,
}

/// How many fleet members must report success for the fleet to be ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Quorum {
  #[default]
  All,
  AtLeast { count: usize },
}

impl Quorum {
  /// Number of successes required out of `expected` members.
  pub fn required(&self, expected: usize) -> usize {
    match self {
      Quorum::All => expected,
      Quorum::AtLeast { count } => *count,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  #[default]
  Exponential,
}
