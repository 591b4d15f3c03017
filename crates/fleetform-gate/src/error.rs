use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
  #[error("gate already open: {gate_id}")]
  AlreadyOpen { gate_id: String },

  #[error("gate not found: {gate_id}")]
  UnknownGate { gate_id: String },
}

/// Errors delivering a readiness signal over a signal channel.
#[derive(Debug, Error)]
pub enum SignalError {
  #[error("signal channel closed")]
  ChannelClosed,

  #[error("signal delivery failed: {message}")]
  Delivery { message: String },
}

impl SignalError {
  pub fn delivery(message: impl Into<String>) -> Self {
    Self::Delivery {
      message: message.into(),
    }
  }
}
