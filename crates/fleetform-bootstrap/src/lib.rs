//! Fleetform Bootstrap
//!
//! Everything that runs on a single fleet member:
//! - [`template`] renders step definitions into a [`StepSequence`]
//! - [`BootstrapSequencer`] executes the sequence step by step, persisting a
//!   checkpoint through a [`StateStore`] after each one
//! - a step with a suspending wait policy ends the invocation; the node
//!   reboots and the next invocation resumes from the checkpoint
//! - the terminal outcome is sent once through a `SignalSink`

mod error;
mod runner;
mod sequencer;
mod state;
mod step;
pub mod template;

pub use error::{SequenceError, SequencerError, StateError, StepError, TemplateError};
pub use runner::{ShellRunner, StepRunner};
pub use sequencer::{BootstrapSequencer, SequencerRun};
pub use state::{BootstrapState, FileStateStore, MemoryStateStore, StateStore};
pub use step::{StepFailure, StepScript, StepSequence};
pub use template::{PlaceholderSet, TemplateContext, render_steps, validate_steps};
