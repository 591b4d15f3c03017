use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetform_gate::ReadinessSignal;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StateError;

/// A node's bootstrap progress, persisted after every step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapState {
  pub next_step_index: usize,
  /// Set once a step failed fatally; the node is then terminal.
  #[serde(default)]
  pub last_error: Option<String>,
  /// Key of the last step processed, checked against the step list on resume.
  #[serde(default)]
  pub last_completed: Option<String>,
  /// Step failures ignored under the `continue` failure policy.
  #[serde(default)]
  pub soft_failures: Vec<String>,
  pub updated_at: DateTime<Utc>,
}

impl BootstrapState {
  pub fn new() -> Self {
    Self {
      next_step_index: 0,
      last_error: None,
      last_completed: None,
      soft_failures: Vec::new(),
      updated_at: Utc::now(),
    }
  }
}

impl Default for BootstrapState {
  fn default() -> Self {
    Self::new()
  }
}

/// Durable storage for bootstrap progress and terminal outcomes.
#[async_trait]
pub trait StateStore: Send + Sync {
  /// Progress of an unfinished bootstrap, if any.
  async fn load(&self, node_id: &str) -> Result<Option<BootstrapState>, StateError>;

  async fn save(&self, node_id: &str, state: &BootstrapState) -> Result<(), StateError>;

  /// Archive the terminal signal and clear progress.
  async fn finish(&self, node_id: &str, signal: &ReadinessSignal) -> Result<(), StateError>;

  /// The archived terminal signal, if the bootstrap already finished.
  async fn outcome(&self, node_id: &str) -> Result<Option<ReadinessSignal>, StateError>;
}

/// JSON files under a state directory:
///
/// ```text
/// {root}/
/// ├── web-1a2b3c4d-0.progress.json
/// └── web-1a2b3c4d-0.outcome.json
/// ```
///
/// Writes go to a temporary file, are flushed to disk and then renamed into
/// place, so a power cut mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileStateStore {
  root: PathBuf,
}

impl FileStateStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn progress_path(&self, node_id: &str) -> PathBuf {
    self.root.join(format!("{}.progress.json", node_id))
  }

  fn outcome_path(&self, node_id: &str) -> PathBuf {
    self.root.join(format!("{}.outcome.json", node_id))
  }

  async fn read_json<T: DeserializeOwned>(
    &self,
    node_id: &str,
    path: &Path,
  ) -> Result<Option<T>, StateError> {
    let content = match fs::read_to_string(path).await {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content)
      .map(Some)
      .map_err(|source| StateError::Corrupt {
        node_id: node_id.to_string(),
        source,
      })
  }

  async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StateError> {
    fs::create_dir_all(&self.root).await?;

    let content = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&content).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
  }
}

#[async_trait]
impl StateStore for FileStateStore {
  async fn load(&self, node_id: &str) -> Result<Option<BootstrapState>, StateError> {
    self.read_json(node_id, &self.progress_path(node_id)).await
  }

  async fn save(&self, node_id: &str, state: &BootstrapState) -> Result<(), StateError> {
    self.write_json(&self.progress_path(node_id), state).await
  }

  async fn finish(&self, node_id: &str, signal: &ReadinessSignal) -> Result<(), StateError> {
    self.write_json(&self.outcome_path(node_id), signal).await?;

    match fs::remove_file(self.progress_path(node_id)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn outcome(&self, node_id: &str) -> Result<Option<ReadinessSignal>, StateError> {
    self.read_json(node_id, &self.outcome_path(node_id)).await
  }
}

#[derive(Debug, Default)]
struct NodeEntry {
  progress: Option<BootstrapState>,
  outcome: Option<ReadinessSignal>,
}

/// In-memory store shared between clones.
///
/// A clone handed to a fresh sequencer behaves like the same disk seen
/// after a reboot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
  nodes: Arc<Mutex<HashMap<String, NodeEntry>>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, NodeEntry>> {
    self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn load(&self, node_id: &str) -> Result<Option<BootstrapState>, StateError> {
    Ok(self.lock().get(node_id).and_then(|e| e.progress.clone()))
  }

  async fn save(&self, node_id: &str, state: &BootstrapState) -> Result<(), StateError> {
    self.lock().entry(node_id.to_string()).or_default().progress = Some(state.clone());
    Ok(())
  }

  async fn finish(&self, node_id: &str, signal: &ReadinessSignal) -> Result<(), StateError> {
    let mut nodes = self.lock();
    let entry = nodes.entry(node_id.to_string()).or_default();
    entry.outcome = Some(signal.clone());
    entry.progress = None;
    Ok(())
  }

  async fn outcome(&self, node_id: &str) -> Result<Option<ReadinessSignal>, StateError> {
    Ok(self.lock().get(node_id).and_then(|e| e.outcome.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path().join("state"));

    assert_eq!(store.load("web-0").await.unwrap(), None);

    let mut state = BootstrapState::new();
    state.next_step_index = 3;
    state.last_completed = Some("3".into());
    store.save("web-0", &state).await.unwrap();

    assert_eq!(store.load("web-0").await.unwrap(), Some(state));
    assert!(!dir.path().join("state/web-0.progress.json.tmp").exists());
  }

  #[tokio::test]
  async fn test_file_store_overwrites_previous_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path());

    let mut state = BootstrapState::new();
    for index in 1..=3 {
      state.next_step_index = index;
      state.last_completed = Some(index.to_string());
      store.save("web-0", &state).await.unwrap();
    }

    let on_disk: BootstrapState = serde_json::from_str(
      &std::fs::read_to_string(dir.path().join("web-0.progress.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk, state);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
      .unwrap()
      .filter_map(Result::ok)
      .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
      .collect();
    assert!(leftovers.is_empty());
  }

  #[tokio::test]
  async fn test_file_store_finish_archives_and_clears() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path());

    store.save("web-0", &BootstrapState::new()).await.unwrap();
    let signal = ReadinessSignal::success("web-0", "completed 2 step(s)");
    store.finish("web-0", &signal).await.unwrap();

    assert_eq!(store.load("web-0").await.unwrap(), None);
    assert_eq!(store.outcome("web-0").await.unwrap(), Some(signal));
    assert!(dir.path().join("web-0.outcome.json").exists());
  }

  #[tokio::test]
  async fn test_file_store_reports_corrupt_state() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("web-0.progress.json"), "{ not json").unwrap();
    let store = FileStateStore::new(dir.path());

    let result = store.load("web-0").await;
    assert!(matches!(result, Err(StateError::Corrupt { ref node_id, .. }) if node_id == "web-0"));
  }

  #[tokio::test]
  async fn test_memory_store_is_shared_between_clones() {
    let store = MemoryStateStore::new();
    let after_reboot = store.clone();

    let mut state = BootstrapState::new();
    state.next_step_index = 1;
    store.save("n1", &state).await.unwrap();

    assert_eq!(
      after_reboot.load("n1").await.unwrap().map(|s| s.next_step_index),
      Some(1)
    );
  }
}
