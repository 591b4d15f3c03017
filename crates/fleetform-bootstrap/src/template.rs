//! Placeholder substitution into step payloads.
//!
//! Payloads are minijinja templates rendered against a fixed set of
//! namespaces:
//!
//! ```text
//! {{ directory.domain_name }}   output of an upstream component
//! {{ params.agent_config }}     parameter store value
//! {{ fleet.name }}              the fleet itself (name, size)
//! ```
//!
//! [`validate_steps`] rejects any placeholder outside that set before
//! anything is provisioned. [`render_steps`] renders with strict undefined
//! handling, so a recognized placeholder without a value is an error rather
//! than an empty string in a script.

use std::collections::{BTreeMap, BTreeSet};

use fleetform_config::{Outputs, StepDef};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;

use crate::error::TemplateError;
use crate::step::{StepScript, StepSequence};

const PARAMS: &str = "params";
const FLEET: &str = "fleet";
const FLEET_KEYS: &[&str] = &["name", "size"];

/// The placeholders a fleet's step templates may reference.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderSet {
  components: BTreeMap<String, BTreeSet<String>>,
  params: BTreeSet<String>,
}

impl PlaceholderSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Allow `{{ <component>.<output> }}` for each declared output.
  pub fn with_component<I, S>(mut self, component: impl Into<String>, outputs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .components
      .entry(component.into())
      .or_default()
      .extend(outputs.into_iter().map(Into::into));
    self
  }

  pub fn with_params<I, S>(mut self, params: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.params.extend(params.into_iter().map(Into::into));
    self
  }

  /// Whether a dotted placeholder path such as `directory.domain_name` is
  /// recognized. Values are flat strings, so only `namespace.key` paths are.
  pub fn recognizes(&self, placeholder: &str) -> bool {
    let mut parts = placeholder.split('.');
    let (Some(namespace), Some(key), None) = (parts.next(), parts.next(), parts.next()) else {
      return false;
    };

    match namespace {
      PARAMS => self.params.contains(key),
      FLEET => FLEET_KEYS.contains(&key),
      component => self
        .components
        .get(component)
        .is_some_and(|outputs| outputs.contains(key)),
    }
  }
}

/// Check every step payload against the recognized placeholders.
pub fn validate_steps(steps: &[StepDef], placeholders: &PlaceholderSet) -> Result<(), TemplateError> {
  let env = environment();

  for step in steps {
    let template = env
      .template_from_str(&step.payload)
      .map_err(|e| template_error(&step.key, e))?;

    let mut used: Vec<String> = template.undeclared_variables(true).into_iter().collect();
    used.sort();

    if let Some(unknown) = used.into_iter().find(|p| !placeholders.recognizes(p)) {
      return Err(TemplateError::UnknownPlaceholder {
        step: step.key.clone(),
        placeholder: unknown,
      });
    }
  }

  Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct FleetValues {
  name: String,
  size: usize,
}

/// Values substituted into step payloads.
#[derive(Debug, Clone)]
pub struct TemplateContext {
  components: BTreeMap<String, Outputs>,
  params: BTreeMap<String, String>,
  fleet: FleetValues,
}

impl TemplateContext {
  pub fn new(fleet_name: impl Into<String>, fleet_size: usize) -> Self {
    Self {
      components: BTreeMap::new(),
      params: BTreeMap::new(),
      fleet: FleetValues {
        name: fleet_name.into(),
        size: fleet_size,
      },
    }
  }

  pub fn with_outputs(mut self, component: impl Into<String>, outputs: Outputs) -> Self {
    self.components.insert(component.into(), outputs);
    self
  }

  pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  fn to_value(&self) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for (component, outputs) in &self.components {
      root.insert(component.clone(), serde_json::json!(outputs));
    }
    root.insert(PARAMS.to_string(), serde_json::json!(self.params));
    root.insert(FLEET.to_string(), serde_json::json!(self.fleet));
    serde_json::Value::Object(root)
  }
}

/// Render step definitions into an executable sequence.
pub fn render_steps(
  steps: &[StepDef],
  context: &TemplateContext,
) -> Result<StepSequence, TemplateError> {
  let env = environment();
  let values = context.to_value();

  let mut rendered = Vec::with_capacity(steps.len());
  for step in steps {
    let payload = env
      .render_str(&step.payload, &values)
      .map_err(|e| template_error(&step.key, e))?;

    let mut script = StepScript::new(step.key.clone(), payload, step.wait);
    if let Some(ms) = step.timeout_ms {
      script = script.with_timeout(std::time::Duration::from_millis(ms));
    }
    rendered.push(script);
  }

  Ok(StepSequence::new(rendered)?)
}

fn environment<'source>() -> Environment<'source> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);
  env.set_keep_trailing_newline(true);
  env
}

fn template_error(step: &str, error: minijinja::Error) -> TemplateError {
  match error.kind() {
    ErrorKind::UndefinedError => TemplateError::MissingValue {
      step: step.to_string(),
      message: error.to_string(),
    },
    _ => TemplateError::Syntax {
      step: step.to_string(),
      message: error.to_string(),
    },
  }
}
