use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs one external routine to completion.
///
/// Implementations must suspend only the calling task. There is no timeout:
/// a routine that never exits keeps its job pending forever.
#[async_trait]
pub trait ProcessInvoker: Send + Sync + 'static {
    async fn invoke(&self, spec: &CommandSpec) -> Result<ProcessOutcome, InvokerError>;
}

pub type SharedProcessInvoker = Arc<dyn ProcessInvoker>;

#[derive(Debug, Default, Clone)]
pub struct TokioProcessInvoker;

#[async_trait]
impl ProcessInvoker for TokioProcessInvoker {
    async fn invoke(&self, spec: &CommandSpec) -> Result<ProcessOutcome, InvokerError> {
        let mut command = Command::new(spec.program.as_str());
        command
            .args(spec.args.iter().map(String::as_str))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A dropped request leaves the routine running.
            .kill_on_drop(false);
        if let Some(cwd) = spec.cwd.as_deref() {
            command.current_dir(cwd);
        }

        debug!(command = %spec.display_line(), "spawning external routine");
        let output = command.output().await.map_err(|source| InvokerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        Ok(ProcessOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).to_string(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).to_string(),
        })
    }
}
