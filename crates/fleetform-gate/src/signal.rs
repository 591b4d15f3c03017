//! Readiness signals and the channels that carry them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SignalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
  Success,
  Failure,
}

impl fmt::Display for SignalOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SignalOutcome::Success => write!(f, "success"),
      SignalOutcome::Failure => write!(f, "failure"),
    }
  }
}

/// The single terminal report a node sends when its bootstrap ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessSignal {
  pub node_id: String,
  pub outcome: SignalOutcome,
  pub detail: String,
  #[serde(default = "Utc::now")]
  pub sent_at: DateTime<Utc>,
}

impl ReadinessSignal {
  pub fn success(node_id: impl Into<String>, detail: impl Into<String>) -> Self {
    Self::new(node_id, SignalOutcome::Success, detail)
  }

  pub fn failure(node_id: impl Into<String>, detail: impl Into<String>) -> Self {
    Self::new(node_id, SignalOutcome::Failure, detail)
  }

  fn new(node_id: impl Into<String>, outcome: SignalOutcome, detail: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      outcome,
      detail: detail.into(),
      sent_at: Utc::now(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.outcome == SignalOutcome::Success
  }
}

/// Delivers a node's readiness signal back to whoever gates the fleet.
///
/// Implementations range from the in-process gate handle to a channel
/// feeding a callback endpoint or a file the node writes for its agent.
#[async_trait]
pub trait SignalSink: Send + Sync {
  async fn deliver(&self, signal: ReadinessSignal) -> Result<(), SignalError>;
}

#[async_trait]
impl<T: SignalSink + ?Sized> SignalSink for Arc<T> {
  async fn deliver(&self, signal: ReadinessSignal) -> Result<(), SignalError> {
    (**self).deliver(signal).await
  }
}

/// A sink that forwards signals into an unbounded channel.
///
/// Pair it with [`crate::GateHandle::listen`] to pump the receiving end into
/// a gate, the way a callback endpoint would.
#[derive(Debug, Clone)]
pub struct ChannelSignalSink {
  sender: mpsc::UnboundedSender<ReadinessSignal>,
}

impl ChannelSignalSink {
  pub fn new(sender: mpsc::UnboundedSender<ReadinessSignal>) -> Self {
    Self { sender }
  }

  /// Create a sink and the receiver it feeds.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReadinessSignal>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

#[async_trait]
impl SignalSink for ChannelSignalSink {
  async fn deliver(&self, signal: ReadinessSignal) -> Result<(), SignalError> {
    self
      .sender
      .send(signal)
      .map_err(|_| SignalError::ChannelClosed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_signal_json_shape() {
    let signal = ReadinessSignal::failure("web-1", "step 3: exit code 1");
    let json = serde_json::to_value(&signal).unwrap();

    assert_eq!(json["node_id"], "web-1");
    assert_eq!(json["outcome"], "failure");
    assert_eq!(json["detail"], "step 3: exit code 1");
  }

  #[test]
  fn test_signal_without_timestamp_parses() {
    let signal: ReadinessSignal =
      serde_json::from_str(r#"{ "node_id": "web-2", "outcome": "success", "detail": "" }"#)
        .unwrap();
    assert!(signal.is_success());
  }

  #[tokio::test]
  async fn test_channel_sink_reports_closed_receiver() {
    let (sink, receiver) = ChannelSignalSink::channel();
    drop(receiver);

    let result = sink.deliver(ReadinessSignal::success("web-1", "")).await;
    assert!(matches!(result, Err(SignalError::ChannelClosed)));
  }
}
