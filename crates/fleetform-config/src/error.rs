use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid option '{option}': {message}")]
  InvalidOption { option: String, message: String },

  #[error("duplicate step key: {key}")]
  DuplicateStepKey { key: String },

  #[error("failed to parse blueprint: {0}")]
  Parse(#[from] serde_json::Error),
}

impl ConfigError {
  pub(crate) fn invalid(option: &str, message: impl Into<String>) -> Self {
    Self::InvalidOption {
      option: option.to_string(),
      message: message.into(),
    }
  }
}
