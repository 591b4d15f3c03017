use std::time::Duration;

use fleetform_config::Quorum;
use fleetform_gate::{
  ChannelSignalSink, FleetOutcome, GateError, GateHandle, ReadinessGate, ReadinessSignal,
  ReportDisposition, SignalSink,
};
use tokio::time::{Instant, advance};

fn nodes(names: &[&str]) -> Vec<String> {
  names.iter().map(|n| n.to_string()).collect()
}

fn open(names: &[&str], timeout_secs: u64) -> GateHandle {
  GateHandle::open(
    "run-1",
    nodes(names),
    Duration::from_secs(timeout_secs),
    Quorum::All,
  )
}

#[tokio::test(start_paused = true)]
async fn test_missing_node_times_out_at_deadline() {
  let gate = open(&["n1", "n2", "n3"], 60);
  let started = Instant::now();
  let waiter = tokio::spawn({
    let gate = gate.clone();
    async move { (gate.wait().await, Instant::now()) }
  });

  advance(Duration::from_secs(5)).await;
  gate.report(ReadinessSignal::success("n1", ""));
  advance(Duration::from_secs(5)).await;
  gate.report(ReadinessSignal::success("n2", ""));

  let (outcome, resolved_at) = waiter.await.unwrap();
  assert_eq!(outcome, FleetOutcome::TimedOut(nodes(&["n3"])));
  assert!(resolved_at - started >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_failed_node_resolves_as_partial_failure() {
  let gate = open(&["n1", "n2", "n3"], 60);
  let started = Instant::now();
  let waiter = tokio::spawn({
    let gate = gate.clone();
    async move { (gate.wait().await, Instant::now()) }
  });

  advance(Duration::from_secs(5)).await;
  gate.report(ReadinessSignal::success("n1", ""));
  advance(Duration::from_secs(5)).await;
  gate.report(ReadinessSignal::success("n2", ""));
  advance(Duration::from_secs(20)).await;
  gate.report(ReadinessSignal::failure("n3", "step 4: exit code 1"));

  let (outcome, resolved_at) = waiter.await.unwrap();
  assert_eq!(outcome, FleetOutcome::PartialFailure(nodes(&["n3"])));
  // Everyone reported, so the gate does not sit out the deadline.
  assert!(resolved_at - started < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_all_success_is_ready() {
  let gate = open(&["n1", "n2"], 60);

  gate.report(ReadinessSignal::success("n2", ""));
  gate.report(ReadinessSignal::success("n1", ""));

  assert_eq!(gate.wait().await, FleetOutcome::Ready);
  assert_eq!(gate.outcome(), Some(FleetOutcome::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_failure_does_not_downgrade_success() {
  let gate = open(&["n1", "n2"], 60);

  assert_eq!(
    gate.report(ReadinessSignal::success("n1", "")),
    ReportDisposition::Accepted
  );
  assert_eq!(
    gate.report(ReadinessSignal::failure("n1", "late retry")),
    ReportDisposition::Duplicate
  );
  gate.report(ReadinessSignal::success("n2", ""));

  assert_eq!(gate.wait().await, FleetOutcome::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_and_late_signals_are_ignored() {
  let gate = open(&["n1"], 10);

  assert_eq!(
    gate.report(ReadinessSignal::success("stranger", "")),
    ReportDisposition::Unexpected
  );

  advance(Duration::from_secs(11)).await;
  assert_eq!(
    gate.report(ReadinessSignal::success("n1", "")),
    ReportDisposition::Late
  );
  assert_eq!(gate.wait().await, FleetOutcome::TimedOut(nodes(&["n1"])));

  let snapshot = gate.snapshot();
  assert!(snapshot.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_at_least_quorum_resolves_early() {
  let gate = GateHandle::open(
    "run-2",
    nodes(&["n1", "n2", "n3"]),
    Duration::from_secs(60),
    Quorum::AtLeast { count: 2 },
  );

  gate.report(ReadinessSignal::success("n1", ""));
  assert_eq!(gate.outcome(), None);
  gate.report(ReadinessSignal::success("n3", ""));

  assert_eq!(gate.outcome(), Some(FleetOutcome::Ready));
  assert_eq!(
    gate.report(ReadinessSignal::failure("n2", "boom")),
    ReportDisposition::Late
  );
  assert_eq!(gate.wait().await, FleetOutcome::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_at_least_quorum_not_met_reports_failures() {
  let gate = GateHandle::open(
    "run-3",
    nodes(&["n1", "n2", "n3"]),
    Duration::from_secs(60),
    Quorum::AtLeast { count: 2 },
  );

  gate.report(ReadinessSignal::success("n1", ""));
  gate.report(ReadinessSignal::failure("n2", "boom"));
  gate.report(ReadinessSignal::failure("n3", "boom"));

  assert_eq!(
    gate.wait().await,
    FleetOutcome::PartialFailure(nodes(&["n2", "n3"]))
  );
}

#[tokio::test(start_paused = true)]
async fn test_channel_sink_feeds_gate() {
  let gate = open(&["n1", "n2"], 60);
  let (sink, receiver) = ChannelSignalSink::channel();
  let pump = tokio::spawn({
    let gate = gate.clone();
    async move { gate.listen(receiver).await }
  });

  sink.deliver(ReadinessSignal::success("n1", "")).await.unwrap();
  sink.deliver(ReadinessSignal::success("n2", "")).await.unwrap();

  assert_eq!(gate.wait().await, FleetOutcome::Ready);
  pump.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_registry_routes_by_gate_id() {
  let gates = ReadinessGate::new();
  let gate = gates
    .open("run-4", nodes(&["n1"]), Duration::from_secs(60), Quorum::All)
    .unwrap();

  assert!(matches!(
    gates.open("run-4", nodes(&["n1"]), Duration::from_secs(60), Quorum::All),
    Err(GateError::AlreadyOpen { .. })
  ));

  let disposition = gates
    .report("run-4", ReadinessSignal::success("n1", ""))
    .unwrap();
  assert_eq!(disposition, ReportDisposition::Accepted);
  assert_eq!(gate.wait().await, FleetOutcome::Ready);

  assert!(gates.close("run-4").is_some());
  assert!(matches!(
    gates.report("run-4", ReadinessSignal::success("n1", "")),
    Err(GateError::UnknownGate { .. })
  ));
}
