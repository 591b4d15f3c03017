use serde::{Deserialize, Serialize};

use crate::component::ComponentDef;
use crate::error::ConfigError;
use crate::fleet::FleetDef;
use crate::options::OrchestratorConfig;

/// A complete provisioning blueprint: components, the fleet, and run options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
  pub name: String,
  pub components: Vec<ComponentDef>,
  pub fleet: FleetDef,
  #[serde(default)]
  pub options: OrchestratorConfig,
}

impl Blueprint {
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let blueprint: Blueprint = serde_json::from_str(content)?;
    blueprint.fleet.validate()?;
    blueprint.options.validate()?;
    Ok(blueprint)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Quorum, WaitPolicy};

  const BLUEPRINT: &str = r#"{
    "name": "web-tier",
    "components": [
      { "name": "network", "kind": "vpc", "outputs": ["vpc_id"] },
      { "name": "directory", "kind": "managed_directory", "depends_on": ["network"], "outputs": ["domain_name"] }
    ],
    "fleet": {
      "name": "web",
      "depends_on": ["directory"],
      "steps": [
        { "key": "join-domain", "payload": "join {{ directory.domain_name }}", "wait": { "type": "fixed_delay", "delay_ms": 10000 } },
        { "key": "restart", "payload": "shutdown -r now", "wait": { "type": "indefinite" } },
        { "key": "install", "payload": "install-app" }
      ]
    },
    "options": { "fleet_size": 3, "quorum": { "type": "at_least", "count": 2 } }
  }"#;

  #[test]
  fn test_parse_blueprint() {
    let blueprint = Blueprint::from_json(BLUEPRINT).unwrap();

    assert_eq!(blueprint.components.len(), 2);
    assert_eq!(blueprint.components[1].depends_on, vec!["network"]);
    assert_eq!(blueprint.fleet.steps[0].wait, WaitPolicy::FixedDelay { delay_ms: 10000 });
    assert!(blueprint.fleet.steps[1].wait.suspends());
    assert_eq!(blueprint.fleet.steps[2].wait, WaitPolicy::default());
    assert_eq!(blueprint.options.quorum, Quorum::AtLeast { count: 2 });
  }

  #[test]
  fn test_duplicate_step_keys_rejected() {
    let content = BLUEPRINT.replace("\"key\": \"install\"", "\"key\": \"restart\"");
    let result = Blueprint::from_json(&content);
    assert!(matches!(result, Err(ConfigError::DuplicateStepKey { key }) if key == "restart"));
  }
}
