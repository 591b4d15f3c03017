//! Fleetform Orchestrator
//!
//! Drives a provisioning run end to end:
//!
//! 1. [`plan`] resolves the component build order and validates the fleet's
//!    step placeholders against the components it depends on
//! 2. components are provisioned through a [`CloudProvisioner`] in dependency
//!    order, independent branches concurrently, with bounded retries
//! 3. the fleet's steps are rendered from the recorded outputs and the fleet
//!    members are launched through a [`NodeLauncher`]
//! 4. the run blocks on the readiness gate, then attaches the ready members
//!    through a [`RoutingRegistrar`]
//!
//! Component failures abort the run. Node failures never do; they show up in
//! the fleet outcome.

mod collaborators;
mod error;
mod events;
mod launcher;
mod orchestrator;
mod plan;
mod retry;

pub use collaborators::{
  CloudProvisioner, CreateRequest, CreatedResource, HealthCheck, LaunchRequest,
  MemoryParameterStore, NodeLauncher, ParameterStore, ResourceStatus, RoutingRegistrar,
};
pub use error::{LaunchError, OrchestratorError, ParameterError, ProvisionError, RoutingError};
pub use events::{ChannelNotifier, NoopNotifier, ProvisioningEvent, ProvisioningNotifier};
pub use launcher::InProcessLauncher;
pub use orchestrator::{Orchestrator, ProvisioningResult, RoutingStatus};
pub use plan::{Plan, plan};
pub use retry::RetryPolicy;
