use std::path::PathBuf;

use async_trait::async_trait;
use fleetform_gate::{ReadinessSignal, SignalError, SignalSink};

/// Writes the readiness signal as JSON to a file the node agent picks up,
/// or to stdout.
pub struct FileSignalSink {
  path: Option<PathBuf>,
}

impl FileSignalSink {
  pub fn new(path: Option<PathBuf>) -> Self {
    Self { path }
  }
}

#[async_trait]
impl SignalSink for FileSignalSink {
  async fn deliver(&self, signal: ReadinessSignal) -> Result<(), SignalError> {
    let content =
      serde_json::to_string_pretty(&signal).map_err(|e| SignalError::delivery(e.to_string()))?;

    let Some(path) = &self.path else {
      println!("{}", content);
      return Ok(());
    };

    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| SignalError::delivery(e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content)
      .await
      .map_err(|e| SignalError::delivery(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
      .await
      .map_err(|e| SignalError::delivery(format!("{}: {}", path.display(), e)))
  }
}
