use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use fleetform_bootstrap::{
  BootstrapSequencer, FileStateStore, SequencerRun, ShellRunner, StepSequence,
};
use fleetform_config::{Blueprint, FailurePolicy, Outputs};
use fleetform_graph::DependencyGraph;
use fleetform_orchestrator::plan;

mod sink;

use sink::FileSignalSink;

/// Fleetform - dependency-ordered provisioning with checkpointed node bootstrap
#[derive(Parser)]
#[command(name = "fleetform")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.fleetform)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a blueprint and print the component build order
  Plan {
    /// Path to the blueprint file (JSON)
    blueprint: PathBuf,
  },

  /// Render the fleet's bootstrap steps from recorded component outputs
  Render {
    /// Path to the blueprint file (JSON)
    blueprint: PathBuf,

    /// JSON file mapping component names to their outputs
    #[arg(long)]
    outputs: PathBuf,

    /// JSON file mapping parameter names to values
    #[arg(long)]
    params: Option<PathBuf>,
  },

  /// Run (or resume) the bootstrap sequence on this node
  Bootstrap {
    /// Path to the rendered steps file (JSON)
    steps: PathBuf,

    /// Correlation id assigned to this node at launch
    #[arg(long)]
    node_id: String,

    /// Where progress is persisted across reboots (default: <data-dir>/state)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Interpreter each payload is passed to
    #[arg(long, default_value = "sh -c")]
    interpreter: String,

    /// Write the readiness signal here instead of stdout
    #[arg(long)]
    signal_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = PolicyArg::FailFast)]
    failure_policy: PolicyArg,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
  FailFast,
  Continue,
}

impl From<PolicyArg> for FailurePolicy {
  fn from(arg: PolicyArg) -> Self {
    match arg {
      PolicyArg::FailFast => FailurePolicy::FailFast,
      PolicyArg::Continue => FailurePolicy::Continue,
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".fleetform"),
  };

  match cli.command {
    Some(Commands::Plan { blueprint }) => plan_blueprint(&blueprint),
    Some(Commands::Render {
      blueprint,
      outputs,
      params,
    }) => render_steps(&blueprint, &outputs, params.as_deref()),
    Some(Commands::Bootstrap {
      steps,
      node_id,
      state_dir,
      interpreter,
      signal_file,
      failure_policy,
    }) => {
      let state_dir = state_dir.unwrap_or_else(|| data_dir.join("state"));
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(bootstrap(
        steps,
        node_id,
        state_dir,
        interpreter,
        signal_file,
        failure_policy.into(),
      ))
    }
    None => {
      println!("fleetform - use --help to see available commands");
      Ok(())
    }
  }
}

fn load_blueprint(path: &Path) -> Result<(Blueprint, DependencyGraph)> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read blueprint file: {}", path.display()))?;
  let blueprint = Blueprint::from_json(&content)
    .with_context(|| format!("invalid blueprint file: {}", path.display()))?;
  let graph = DependencyGraph::from_components(blueprint.components.iter().cloned())
    .context("invalid component graph")?;
  Ok((blueprint, graph))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {} file: {}", what, path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse {} file: {}", what, path.display()))
}

fn plan_blueprint(path: &Path) -> Result<()> {
  let (blueprint, graph) = load_blueprint(path)?;
  let plan = plan(&graph, &blueprint.fleet).context("blueprint failed validation")?;

  eprintln!("Blueprint '{}' is valid", blueprint.name);

  let output = serde_json::json!({
    "order": plan.order,
    "fleet": {
      "name": blueprint.fleet.name,
      "after": plan.fleet_ancestors,
      "steps": blueprint.fleet.steps.len(),
      "size": blueprint.options.fleet_size,
    },
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

fn render_steps(blueprint_path: &Path, outputs_path: &Path, params_path: Option<&Path>) -> Result<()> {
  let (blueprint, mut graph) = load_blueprint(blueprint_path)?;
  let plan = plan(&graph, &blueprint.fleet).context("blueprint failed validation")?;

  let outputs: BTreeMap<String, Outputs> = read_json(outputs_path, "outputs")?;
  for (component, values) in outputs {
    graph
      .record_outputs(&component, values)
      .with_context(|| format!("cannot record outputs for '{}'", component))?;
  }

  let params: BTreeMap<String, String> = match params_path {
    Some(path) => read_json(path, "params")?,
    None => BTreeMap::new(),
  };

  let steps = plan
    .render(&graph, &blueprint.fleet, blueprint.options.fleet_size, &params)
    .context("failed to render fleet steps")?;

  println!("{}", serde_json::to_string_pretty(&steps)?);
  Ok(())
}

async fn bootstrap(
  steps_path: PathBuf,
  node_id: String,
  state_dir: PathBuf,
  interpreter: String,
  signal_file: Option<PathBuf>,
  failure_policy: FailurePolicy,
) -> Result<()> {
  let steps: StepSequence = read_json(&steps_path, "steps")?;
  let Some(runner) = ShellRunner::from_command_line(&interpreter) else {
    bail!("interpreter must not be empty");
  };

  eprintln!(
    "Bootstrapping node {} ({} steps, state in {})",
    node_id,
    steps.len(),
    state_dir.display()
  );

  let sequencer = BootstrapSequencer::new(
    node_id,
    runner,
    FileStateStore::new(state_dir),
    Arc::new(FileSignalSink::new(signal_file)),
  )
  .with_failure_policy(failure_policy);

  match sequencer.run(&steps).await.context("bootstrap failed")? {
    SequencerRun::Suspended {
      next_step_index,
      key,
    } => {
      eprintln!(
        "Suspended after step '{}'; run again after restart to resume at step {}",
        key, next_step_index
      );
    }
    SequencerRun::Completed(signal) => {
      eprintln!("Bootstrap finished: {} {}", signal.outcome, signal.detail);
    }
  }

  Ok(())
}
