//! Build-time validation of a blueprint before anything is provisioned.

use std::collections::{BTreeMap, BTreeSet};

use fleetform_bootstrap::{PlaceholderSet, StepSequence, TemplateContext, render_steps, validate_steps};
use fleetform_config::FleetDef;
use fleetform_graph::DependencyGraph;

use crate::error::OrchestratorError;

/// A validated provisioning plan.
#[derive(Debug, Clone)]
pub struct Plan {
  /// Component names in creation order.
  pub order: Vec<String>,
  /// Components whose outputs the fleet may reference: its declared
  /// dependencies and everything they depend on.
  pub fleet_ancestors: BTreeSet<String>,
}

/// Resolve the build order and check the fleet against the graph: its
/// dependencies and routing target exist and every step placeholder is
/// recognized.
pub fn plan(graph: &DependencyGraph, fleet: &FleetDef) -> Result<Plan, OrchestratorError> {
  let order: Vec<String> = graph
    .resolve_order()?
    .into_iter()
    .map(|c| c.name.clone())
    .collect();

  if let Some(dependency) = fleet.depends_on.iter().find(|d| !graph.contains(d)) {
    return Err(OrchestratorError::UnknownFleetDependency {
      fleet: fleet.name.clone(),
      dependency: dependency.clone(),
    });
  }

  if let Some(routing) = &fleet.routing
    && !graph.contains(&routing.target)
  {
    return Err(OrchestratorError::UnknownRoutingTarget {
      fleet: fleet.name.clone(),
      target: routing.target.clone(),
    });
  }

  let fleet_ancestors = graph.closure(fleet.depends_on.iter().map(String::as_str))?;

  let mut placeholders = PlaceholderSet::new().with_params(fleet.parameters.iter().cloned());
  for name in &fleet_ancestors {
    if let Some(component) = graph.get(name) {
      placeholders = placeholders.with_component(name.clone(), component.outputs.iter().cloned());
    }
  }

  validate_steps(&fleet.steps, &placeholders).map_err(|source| OrchestratorError::Template {
    fleet: fleet.name.clone(),
    source,
  })?;

  Ok(Plan {
    order,
    fleet_ancestors,
  })
}

impl Plan {
  /// Render the fleet's steps from recorded outputs and parameter values.
  pub fn render(
    &self,
    graph: &DependencyGraph,
    fleet: &FleetDef,
    fleet_size: usize,
    params: &BTreeMap<String, String>,
  ) -> Result<StepSequence, OrchestratorError> {
    let mut context = TemplateContext::new(fleet.name.clone(), fleet_size);

    for name in &self.fleet_ancestors {
      context = context.with_outputs(name.clone(), graph.outputs_of(name)?.clone());
    }

    for name in &fleet.parameters {
      let value = params
        .get(name)
        .ok_or_else(|| OrchestratorError::MissingParameter { name: name.clone() })?;
      context = context.with_param(name.clone(), value.clone());
    }

    render_steps(&fleet.steps, &context).map_err(|source| OrchestratorError::Template {
      fleet: fleet.name.clone(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use fleetform_config::{ComponentDef, Outputs, StepDef, WaitPolicy};

  use super::*;

  fn graph() -> DependencyGraph {
    DependencyGraph::from_components([
      ComponentDef::new("network", Vec::<String>::new()).with_outputs(["vpc_id"]),
      ComponentDef::new("directory", ["network"]).with_outputs(["domain_name"]),
      ComponentDef::new("database", ["network"]).with_outputs(["endpoint"]),
    ])
    .unwrap()
  }

  fn fleet(payload: &str) -> FleetDef {
    FleetDef {
      name: "web".into(),
      depends_on: vec!["directory".into()],
      parameters: vec!["agent_config".into()],
      steps: vec![StepDef::new("1", payload, WaitPolicy::default())],
      routing: None,
    }
  }

  #[test]
  fn test_fleet_may_reference_transitive_dependencies() {
    let plan = plan(
      &graph(),
      &fleet("{{ directory.domain_name }} {{ network.vpc_id }} {{ params.agent_config }}"),
    )
    .unwrap();

    assert_eq!(plan.order, vec!["network", "directory", "database"]);
    assert_eq!(
      plan.fleet_ancestors.iter().collect::<Vec<_>>(),
      vec!["directory", "network"]
    );
  }

  #[test]
  fn test_fleet_cannot_reference_unrelated_component() {
    let err = plan(&graph(), &fleet("{{ database.endpoint }}")).unwrap_err();
    assert!(matches!(err, OrchestratorError::Template { .. }));
  }

  #[test]
  fn test_unknown_fleet_dependency() {
    let mut fleet = fleet("true");
    fleet.depends_on.push("cache".into());

    let err = plan(&graph(), &fleet).unwrap_err();
    assert!(matches!(
      err,
      OrchestratorError::UnknownFleetDependency { ref dependency, .. } if dependency == "cache"
    ));
  }

  #[test]
  fn test_render_requires_outputs_and_parameters() {
    let mut graph = graph();
    let fleet = fleet("join {{ directory.domain_name }}");
    let plan = plan(&graph, &fleet).unwrap();
    let params = BTreeMap::from([("agent_config".to_string(), "cfg".to_string())]);

    let not_provisioned = plan.render(&graph, &fleet, 2, &params).unwrap_err();
    assert!(matches!(not_provisioned, OrchestratorError::Graph(_)));

    graph
      .record_outputs("network", Outputs::from([("vpc_id".into(), "vpc-1".into())]))
      .unwrap();
    graph
      .record_outputs(
        "directory",
        Outputs::from([("domain_name".into(), "corp.example".into())]),
      )
      .unwrap();

    let missing = plan.render(&graph, &fleet, 2, &BTreeMap::new()).unwrap_err();
    assert!(matches!(missing, OrchestratorError::MissingParameter { .. }));

    let steps = plan.render(&graph, &fleet, 2, &params).unwrap();
    assert_eq!(steps.steps()[0].payload(), "join corp.example");
  }
}
