use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("duplicate component: {name}")]
  DuplicateComponent { name: String },

  #[error("component not found: {name}")]
  UnknownComponent { name: String },

  #[error("component '{component}' depends on unknown component '{dependency}'")]
  UnknownDependency {
    component: String,
    dependency: String,
  },

  /// The dependency relation is not acyclic. Lists one concrete cycle.
  #[error("cycle detected in component graph: {}", .components.join(" -> "))]
  Cycle { components: Vec<String> },

  /// Outputs were requested before the component was provisioned.
  #[error("component '{name}' has not been provisioned")]
  NotProvisioned { name: String },

  #[error("component '{name}' was already provisioned")]
  AlreadyProvisioned { name: String },
}
