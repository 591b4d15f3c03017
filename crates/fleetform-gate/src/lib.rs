//! Fleetform Gate
//!
//! The readiness gate collects one terminal signal per fleet member and
//! resolves to a single fleet outcome:
//!
//! ```text
//!   node bootstrap ──ReadinessSignal──▶ SignalSink ──▶ GateHandle::report
//!                                                          │
//!                 orchestrator ◀──FleetOutcome── GateHandle::wait
//! ```
//!
//! The outcome is `Ready` once the quorum reported success, otherwise
//! `PartialFailure` (some member failed) or `TimedOut` (some member never
//! reported before the deadline).

mod error;
mod gate;
mod signal;

pub use error::{GateError, SignalError};
pub use gate::{FleetOutcome, FleetReadinessRecord, GateHandle, ReadinessGate, ReportDisposition};
pub use signal::{ChannelSignalSink, ReadinessSignal, SignalOutcome, SignalSink};
