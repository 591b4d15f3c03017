//! Fleetform Config
//!
//! This crate contains the serializable blueprint types for fleetform. A
//! blueprint describes the infrastructure components to bring up, the fleet
//! of machines that depends on them, and the options that govern a
//! provisioning run.
//!
//! Blueprints are loaded from JSON files (via the CLI) and handed to the
//! graph, bootstrap and orchestrator crates, which validate them and turn
//! them into runtime structures.

mod blueprint;
mod component;
mod enums;
mod error;
mod fleet;
mod options;
mod step;

pub use blueprint::Blueprint;
pub use component::{ComponentDef, Outputs};
pub use enums::{FailurePolicy, Quorum, RetryBackoff};
pub use error::ConfigError;
pub use fleet::{FleetDef, HealthCheckDef, RoutingDef};
pub use options::OrchestratorConfig;
pub use step::{StepDef, WaitPolicy};
