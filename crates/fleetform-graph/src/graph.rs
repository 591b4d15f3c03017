use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use fleetform_config::{ComponentDef, Outputs};
use tracing::debug;

use crate::error::GraphError;

/// `to` must be provisioned, and its outputs available, before `from` starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
  pub from: String,
  pub to: String,
}

/// Graph of components for build ordering and output lookup.
///
/// Components keep their declaration order, which is the tie-break whenever
/// more than one component is ready, so the same blueprint always builds in
/// the same order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
  components: Vec<ComponentDef>,
  index: HashMap<String, usize>,
  outputs: HashMap<String, Outputs>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a graph from component definitions in declaration order.
  pub fn from_components(
    components: impl IntoIterator<Item = ComponentDef>,
  ) -> Result<Self, GraphError> {
    let mut graph = Self::new();
    for component in components {
      graph.add_component(component)?;
    }
    Ok(graph)
  }

  /// Declare a component. Dependencies may name components declared later;
  /// they are checked when the order is resolved.
  pub fn add_component(&mut self, component: ComponentDef) -> Result<(), GraphError> {
    if self.index.contains_key(&component.name) {
      return Err(GraphError::DuplicateComponent {
        name: component.name,
      });
    }
    self
      .index
      .insert(component.name.clone(), self.components.len());
    self.components.push(component);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&ComponentDef> {
    self.index.get(name).map(|&i| &self.components[i])
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Components in declaration order.
  pub fn components(&self) -> &[ComponentDef] {
    &self.components
  }

  pub fn len(&self) -> usize {
    self.components.len()
  }

  pub fn is_empty(&self) -> bool {
    self.components.is_empty()
  }

  /// All dependency edges, in declaration order.
  pub fn edges(&self) -> Vec<Edge> {
    self
      .components
      .iter()
      .flat_map(|c| {
        c.depends_on.iter().map(|dep| Edge {
          from: c.name.clone(),
          to: dep.clone(),
        })
      })
      .collect()
  }

  /// Check that every dependency names a declared component.
  pub fn validate(&self) -> Result<(), GraphError> {
    for component in &self.components {
      for dep in &component.depends_on {
        if !self.index.contains_key(dep) {
          return Err(GraphError::UnknownDependency {
            component: component.name.clone(),
            dependency: dep.clone(),
          });
        }
      }
    }
    Ok(())
  }

  /// Resolve a creation order where every component follows its dependencies.
  ///
  /// Kahn's algorithm; among ready components the earliest declared goes
  /// first. Fails with [`GraphError::Cycle`] if the relation is not acyclic.
  pub fn resolve_order(&self) -> Result<Vec<&ComponentDef>, GraphError> {
    self.validate()?;

    let n = self.components.len();
    let mut remaining = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, component) in self.components.iter().enumerate() {
      for dep in self.dependency_indices(component) {
        remaining[i] += 1;
        dependents[dep].push(i);
      }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
      order.push(&self.components[next]);
      for &dependent in &dependents[next] {
        remaining[dependent] -= 1;
        if remaining[dependent] == 0 {
          ready.insert(dependent);
        }
      }
    }

    if order.len() < n {
      let components = self.find_cycle().unwrap_or_else(|| {
        // Kahn left nodes behind, so a cycle exists; report what is stuck.
        (0..n)
          .filter(|&i| remaining[i] > 0)
          .map(|i| self.components[i].name.clone())
          .collect()
      });
      return Err(GraphError::Cycle { components });
    }

    debug!(
      order = ?order.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
      "resolved component order"
    );

    Ok(order)
  }

  /// Components not yet in `done` whose dependencies are all in `done`,
  /// in declaration order.
  pub fn ready(&self, done: &HashSet<String>) -> Vec<&ComponentDef> {
    self
      .components
      .iter()
      .filter(|c| !done.contains(&c.name))
      .filter(|c| c.depends_on.iter().all(|dep| done.contains(dep)))
      .collect()
  }

  /// Transitive dependencies of `name` (not including `name` itself).
  pub fn ancestors(&self, name: &str) -> Result<BTreeSet<String>, GraphError> {
    let start = self.get(name).ok_or_else(|| GraphError::UnknownComponent {
      name: name.to_string(),
    })?;
    self.closure(start.depends_on.iter().map(String::as_str))
  }

  /// `roots` plus everything they transitively depend on.
  pub fn closure<'a>(
    &self,
    roots: impl IntoIterator<Item = &'a str>,
  ) -> Result<BTreeSet<String>, GraphError> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = roots.into_iter().collect();

    while let Some(current) = queue.pop_front() {
      if seen.contains(current) {
        continue;
      }
      let component = self.get(current).ok_or_else(|| GraphError::UnknownComponent {
        name: current.to_string(),
      })?;
      seen.insert(current.to_string());
      queue.extend(component.depends_on.iter().map(String::as_str));
    }

    Ok(seen)
  }

  /// Record the outputs of a provisioned component. A component is
  /// provisioned at most once per run.
  pub fn record_outputs(&mut self, name: &str, outputs: Outputs) -> Result<(), GraphError> {
    if !self.contains(name) {
      return Err(GraphError::UnknownComponent {
        name: name.to_string(),
      });
    }
    if self.outputs.contains_key(name) {
      return Err(GraphError::AlreadyProvisioned {
        name: name.to_string(),
      });
    }
    self.outputs.insert(name.to_string(), outputs);
    Ok(())
  }

  /// Outputs of a provisioned component.
  pub fn outputs_of(&self, name: &str) -> Result<&Outputs, GraphError> {
    if !self.contains(name) {
      return Err(GraphError::UnknownComponent {
        name: name.to_string(),
      });
    }
    self
      .outputs
      .get(name)
      .ok_or_else(|| GraphError::NotProvisioned {
        name: name.to_string(),
      })
  }

  pub fn is_provisioned(&self, name: &str) -> bool {
    self.outputs.contains_key(name)
  }

  /// Distinct dependency indices of a component (duplicates collapse).
  fn dependency_indices(&self, component: &ComponentDef) -> BTreeSet<usize> {
    component
      .depends_on
      .iter()
      .filter_map(|dep| self.index.get(dep).copied())
      .collect()
  }

  /// Find one cycle using DFS with recursion-stack coloring.
  fn find_cycle(&self) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
      White,
      Gray,
      Black,
    }

    fn visit(
      graph: &DependencyGraph,
      node: usize,
      color: &mut [Color],
      stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
      color[node] = Color::Gray;
      stack.push(node);

      for dep in graph.dependency_indices(&graph.components[node]) {
        match color[dep] {
          Color::Gray => {
            // Back edge: the cycle is the stack from `dep` onwards.
            let start = stack.iter().position(|&n| n == dep)?;
            let mut cycle = stack[start..].to_vec();
            cycle.push(dep);
            return Some(cycle);
          }
          Color::White => {
            if let Some(cycle) = visit(graph, dep, color, stack) {
              return Some(cycle);
            }
          }
          Color::Black => {}
        }
      }

      stack.pop();
      color[node] = Color::Black;
      None
    }

    let mut color = vec![Color::White; self.components.len()];
    let mut stack = Vec::new();

    for start in 0..self.components.len() {
      if color[start] == Color::White
        && let Some(cycle) = visit(self, start, &mut color, &mut stack)
      {
        return Some(
          cycle
            .into_iter()
            .map(|i| self.components[i].name.clone())
            .collect(),
        );
      }
    }

    None
  }
}
