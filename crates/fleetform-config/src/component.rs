use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outputs published by a provisioned component, e.g. `dns_name`.
pub type Outputs = BTreeMap<String, String>;

/// A named unit of infrastructure with explicit create-order dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDef {
  pub name: String,
  /// Resource kind handed to the provisioner, e.g. "managed_directory".
  #[serde(default)]
  pub kind: String,
  #[serde(default)]
  pub depends_on: Vec<String>,
  /// Opaque resource spec; only the provisioner interprets it.
  #[serde(default)]
  pub spec: serde_json::Value,
  /// Output keys this component promises to publish once provisioned.
  #[serde(default)]
  pub outputs: Vec<String>,
}

impl ComponentDef {
  pub fn new<I, S>(name: impl Into<String>, depends_on: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      name: name.into(),
      kind: String::new(),
      depends_on: depends_on.into_iter().map(Into::into).collect(),
      spec: serde_json::Value::Null,
      outputs: Vec::new(),
    }
  }

  pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
    self.kind = kind.into();
    self
  }

  pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
    self.spec = spec;
    self
  }

  pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.outputs = outputs.into_iter().map(Into::into).collect();
    self
  }
}
