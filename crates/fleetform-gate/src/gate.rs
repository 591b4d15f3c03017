//! Fleet readiness gate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleetform_config::Quorum;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{GateError, SignalError};
use crate::signal::{ReadinessSignal, SignalOutcome, SignalSink};

/// Terminal outcome of a fleet readiness gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "nodes", rename_all = "snake_case")]
pub enum FleetOutcome {
  /// The quorum of expected nodes reported success before the deadline.
  Ready,
  /// At least one node reported failure. Lists the failed node ids.
  PartialFailure(Vec<String>),
  /// Some nodes never reported before the deadline. Lists the missing ids.
  TimedOut(Vec<String>),
}

impl FleetOutcome {
  pub fn is_ready(&self) -> bool {
    matches!(self, FleetOutcome::Ready)
  }
}

impl fmt::Display for FleetOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FleetOutcome::Ready => write!(f, "ready"),
      FleetOutcome::PartialFailure(nodes) => write!(f, "partial failure: {}", nodes.join(", ")),
      FleetOutcome::TimedOut(nodes) => write!(f, "timed out waiting for: {}", nodes.join(", ")),
    }
  }
}

/// What happened to a reported signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
  Accepted,
  /// The node already reported; the first terminal signal is kept.
  Duplicate,
  /// The node is not part of this fleet.
  Unexpected,
  /// The gate had already resolved.
  Late,
}

/// Signals received for one fleet, guarded by the gate's mutex.
#[derive(Debug, Clone)]
pub struct FleetReadinessRecord {
  expected: BTreeSet<String>,
  received: BTreeMap<String, ReadinessSignal>,
  deadline: Instant,
  required: usize,
  outcome: Option<FleetOutcome>,
}

impl FleetReadinessRecord {
  pub fn new(
    expected: impl IntoIterator<Item = String>,
    deadline: Instant,
    quorum: Quorum,
  ) -> Self {
    let expected: BTreeSet<String> = expected.into_iter().collect();
    let required = quorum.required(expected.len());
    Self {
      expected,
      received: BTreeMap::new(),
      deadline,
      required,
      outcome: None,
    }
  }

  pub fn expected(&self) -> &BTreeSet<String> {
    &self.expected
  }

  pub fn received(&self) -> &BTreeMap<String, ReadinessSignal> {
    &self.received
  }

  pub fn deadline(&self) -> Instant {
    self.deadline
  }

  /// The cached terminal outcome, if the record has resolved.
  pub fn outcome(&self) -> Option<&FleetOutcome> {
    self.outcome.as_ref()
  }

  /// Record a signal observed at `now`.
  pub fn record(&mut self, signal: ReadinessSignal, now: Instant) -> ReportDisposition {
    if self.outcome.is_some() || now >= self.deadline {
      return ReportDisposition::Late;
    }
    if !self.expected.contains(&signal.node_id) {
      return ReportDisposition::Unexpected;
    }
    if self.received.contains_key(&signal.node_id) {
      return ReportDisposition::Duplicate;
    }
    self.received.insert(signal.node_id.clone(), signal);
    ReportDisposition::Accepted
  }

  /// Resolve the record if it can be resolved at `now`. Once resolved the
  /// outcome never changes.
  pub fn evaluate(&mut self, now: Instant) -> Option<FleetOutcome> {
    if let Some(outcome) = &self.outcome {
      return Some(outcome.clone());
    }

    let resolved = if self.successes() >= self.required {
      Some(FleetOutcome::Ready)
    } else if self.received.len() == self.expected.len() || now >= self.deadline {
      Some(self.final_outcome())
    } else {
      None
    };

    if let Some(outcome) = &resolved {
      self.outcome = Some(outcome.clone());
    }
    resolved
  }

  fn final_outcome(&self) -> FleetOutcome {
    if self.successes() >= self.required {
      return FleetOutcome::Ready;
    }
    let failed = self.failed();
    if !failed.is_empty() {
      return FleetOutcome::PartialFailure(failed);
    }
    FleetOutcome::TimedOut(self.missing())
  }

  fn successes(&self) -> usize {
    self.received.values().filter(|s| s.is_success()).count()
  }

  fn failed(&self) -> Vec<String> {
    self
      .received
      .values()
      .filter(|s| s.outcome == SignalOutcome::Failure)
      .map(|s| s.node_id.clone())
      .collect()
  }

  fn missing(&self) -> Vec<String> {
    self
      .expected
      .iter()
      .filter(|id| !self.received.contains_key(*id))
      .cloned()
      .collect()
  }
}

struct GateInner {
  gate_id: String,
  record: Mutex<FleetReadinessRecord>,
  changed: Notify,
}

/// Handle to one open gate. Cheap to clone; all clones share the record.
#[derive(Clone)]
pub struct GateHandle {
  inner: Arc<GateInner>,
}

impl GateHandle {
  /// Open a gate for `expected` nodes that resolves at the latest after
  /// `timeout`.
  pub fn open(
    gate_id: impl Into<String>,
    expected: impl IntoIterator<Item = String>,
    timeout: Duration,
    quorum: Quorum,
  ) -> Self {
    let record = FleetReadinessRecord::new(expected, Instant::now() + timeout, quorum);
    let gate_id = gate_id.into();

    info!(
      gate_id = %gate_id,
      expected = record.expected().len(),
      timeout_ms = timeout.as_millis() as u64,
      "gate_opened"
    );

    Self {
      inner: Arc::new(GateInner {
        gate_id,
        record: Mutex::new(record),
        changed: Notify::new(),
      }),
    }
  }

  pub fn id(&self) -> &str {
    &self.inner.gate_id
  }

  /// Report a node's terminal signal.
  pub fn report(&self, signal: ReadinessSignal) -> ReportDisposition {
    let node_id = signal.node_id.clone();
    let outcome = signal.outcome;
    let now = Instant::now();

    let disposition = {
      let mut record = self.lock();
      let disposition = record.record(signal, now);
      record.evaluate(now);
      disposition
    };

    match disposition {
      ReportDisposition::Accepted => {
        info!(
          gate_id = %self.inner.gate_id,
          node_id = %node_id,
          outcome = %outcome,
          "signal_received"
        );
        self.inner.changed.notify_waiters();
      }
      other => {
        warn!(
          gate_id = %self.inner.gate_id,
          node_id = %node_id,
          disposition = ?other,
          "signal_ignored"
        );
      }
    }

    disposition
  }

  /// Wait until the gate resolves.
  pub async fn wait(&self) -> FleetOutcome {
    let deadline = self.lock().deadline();

    loop {
      let notified = self.inner.changed.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      let resolved = self.lock().evaluate(Instant::now());
      if let Some(outcome) = resolved {
        info!(gate_id = %self.inner.gate_id, outcome = %outcome, "gate_resolved");
        return outcome;
      }

      tokio::select! {
        _ = &mut notified => {}
        _ = tokio::time::sleep_until(deadline) => {}
      }
    }
  }

  /// The outcome if the gate has already resolved, without waiting.
  pub fn outcome(&self) -> Option<FleetOutcome> {
    self.lock().evaluate(Instant::now())
  }

  /// A consistent copy of the current record.
  pub fn snapshot(&self) -> FleetReadinessRecord {
    self.lock().clone()
  }

  /// Feed signals from a channel into this gate until the channel closes or
  /// the gate resolves.
  pub async fn listen(&self, mut receiver: mpsc::UnboundedReceiver<ReadinessSignal>) {
    loop {
      tokio::select! {
        signal = receiver.recv() => match signal {
          Some(signal) => {
            self.report(signal);
          }
          None => break,
        },
        _ = self.wait() => break,
      }
    }
  }

  fn lock(&self) -> MutexGuard<'_, FleetReadinessRecord> {
    self
      .inner
      .record
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl SignalSink for GateHandle {
  async fn deliver(&self, signal: ReadinessSignal) -> Result<(), SignalError> {
    self.report(signal);
    Ok(())
  }
}

/// Registry of open gates, keyed by a correlation id such as the run id.
///
/// A signal endpoint that only knows the correlation id routes reports
/// through here.
#[derive(Clone, Default)]
pub struct ReadinessGate {
  gates: Arc<Mutex<HashMap<String, GateHandle>>>,
}

impl ReadinessGate {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn open(
    &self,
    gate_id: impl Into<String>,
    expected: impl IntoIterator<Item = String>,
    timeout: Duration,
    quorum: Quorum,
  ) -> Result<GateHandle, GateError> {
    let gate_id = gate_id.into();
    let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
    if gates.contains_key(&gate_id) {
      return Err(GateError::AlreadyOpen { gate_id });
    }
    let handle = GateHandle::open(gate_id.clone(), expected, timeout, quorum);
    gates.insert(gate_id, handle.clone());
    Ok(handle)
  }

  pub fn get(&self, gate_id: &str) -> Option<GateHandle> {
    self
      .gates
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(gate_id)
      .cloned()
  }

  pub fn report(
    &self,
    gate_id: &str,
    signal: ReadinessSignal,
  ) -> Result<ReportDisposition, GateError> {
    let handle = self.get(gate_id).ok_or_else(|| GateError::UnknownGate {
      gate_id: gate_id.to_string(),
    })?;
    Ok(handle.report(signal))
  }

  /// Forget a gate. Outstanding handles keep working.
  pub fn close(&self, gate_id: &str) -> Option<GateHandle> {
    self
      .gates
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(gate_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
  }

  #[derive(Clone, Copy, Debug)]
  enum Report {
    Missing,
    Success,
    Failure,
  }

  #[test]
  fn test_outcomes_are_exhaustive_and_exclusive() {
    use Report::*;
    let choices = [Missing, Success, Failure];
    let nodes = ["n1", "n2", "n3"];

    for a in choices {
      for b in choices {
        for c in choices {
          let start = Instant::now();
          let deadline = start + Duration::from_secs(60);
          let mut record = FleetReadinessRecord::new(ids(&nodes), deadline, Quorum::All);

          for (node, report) in nodes.iter().zip([a, b, c]) {
            let signal = match report {
              Missing => continue,
              Success => ReadinessSignal::success(*node, ""),
              Failure => ReadinessSignal::failure(*node, "boom"),
            };
            assert_eq!(record.record(signal, start), ReportDisposition::Accepted);
          }

          let outcome = record.evaluate(deadline).expect("resolved at deadline");
          let reports = [a, b, c];
          let any_failure = reports.iter().any(|r| matches!(r, Failure));
          let any_missing = reports.iter().any(|r| matches!(r, Missing));

          match outcome {
            FleetOutcome::Ready => assert!(!any_failure && !any_missing),
            FleetOutcome::PartialFailure(failed) => {
              assert!(any_failure);
              assert!(!failed.is_empty());
            }
            FleetOutcome::TimedOut(missing) => {
              assert!(!any_failure && any_missing);
              assert!(!missing.is_empty());
            }
          }
        }
      }
    }
  }

  #[test]
  fn test_record_keeps_first_signal() {
    let start = Instant::now();
    let mut record = FleetReadinessRecord::new(
      ids(&["n1", "n2"]),
      start + Duration::from_secs(10),
      Quorum::All,
    );

    record.record(ReadinessSignal::success("n1", "first"), start);
    let disposition = record.record(ReadinessSignal::failure("n1", "retried"), start);

    assert_eq!(disposition, ReportDisposition::Duplicate);
    assert!(record.received()["n1"].is_success());
  }

  #[test]
  fn test_report_after_deadline_is_late() {
    let start = Instant::now();
    let deadline = start + Duration::from_secs(10);
    let mut record = FleetReadinessRecord::new(ids(&["n1"]), deadline, Quorum::All);

    let disposition = record.record(ReadinessSignal::success("n1", ""), deadline);
    assert_eq!(disposition, ReportDisposition::Late);
    assert_eq!(
      record.evaluate(deadline),
      Some(FleetOutcome::TimedOut(ids(&["n1"])))
    );
  }

  #[test]
  fn test_empty_fleet_is_ready() {
    let start = Instant::now();
    let mut record =
      FleetReadinessRecord::new(Vec::new(), start + Duration::from_secs(1), Quorum::All);
    assert_eq!(record.evaluate(start), Some(FleetOutcome::Ready));
  }

  #[test]
  fn test_outcome_json_shape() {
    let json = serde_json::to_value(FleetOutcome::TimedOut(ids(&["n3"]))).unwrap();
    assert_eq!(json["status"], "timed_out");
    assert_eq!(json["nodes"][0], "n3");
  }
}
