use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::StepError;
use crate::step::StepScript;

const STDERR_TAIL_LINES: usize = 5;

/// Executes a single step's payload on the node.
#[async_trait]
pub trait StepRunner: Send + Sync {
  async fn execute(&self, step: &StepScript) -> Result<(), StepError>;
}

/// Runs payloads through a shell interpreter (`sh -c <payload>` by default).
#[derive(Debug, Clone)]
pub struct ShellRunner {
  program: String,
  args: Vec<String>,
}

impl ShellRunner {
  pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self {
      program: program.into(),
      args: args.into_iter().map(Into::into).collect(),
    }
  }

  /// Parse an interpreter command line such as `powershell -Command`.
  pub fn from_command_line(command: &str) -> Option<Self> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    Some(Self::new(program, parts))
  }

  pub fn program(&self) -> &str {
    &self.program
  }
}

impl Default for ShellRunner {
  fn default() -> Self {
    Self::new("sh", ["-c"])
  }
}

#[async_trait]
impl StepRunner for ShellRunner {
  async fn execute(&self, step: &StepScript) -> Result<(), StepError> {
    let output = Command::new(&self.program)
      .args(&self.args)
      .arg(step.payload())
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .output()
      .await?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
      debug!(step = %step.key(), "{}", line);
    }

    if output.status.success() {
      return Ok(());
    }

    let stderr = stderr_tail(&output.stderr);
    match output.status.code() {
      Some(code) => Err(StepError::ExitCode { code, stderr }),
      None => Err(StepError::Terminated { stderr }),
    }
  }
}

fn stderr_tail(stderr: &[u8]) -> String {
  let text = String::from_utf8_lossy(stderr);
  let lines: Vec<&str> = text
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .collect();
  let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
  lines[start..].join(" | ")
}
