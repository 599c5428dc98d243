// ABOUTME: Step runner contract: run one external command, stream its output, allow cancellation.
// ABOUTME: Exports the tokio-based ProcessRunner and ANSI stripping used for clean captured text.

mod ansi;
mod decode;
mod process;

pub use ansi::strip_ansi;
pub use decode::OutputDecoder;
pub use process::{ProcessRunner, quiet_env};

use async_trait::async_trait;
use snafu::Snafu;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// A fully resolved command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Extra environment, applied on top of the non-interactive defaults.
    pub env: HashMap<String, String>,
}

impl Invocation {
    pub fn new(command: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            env: HashMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A piece of process output, already stripped of ANSI escapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// Channel the runner forwards output chunks into, in arrival order.
pub type OutputSender = mpsc::UnboundedSender<OutputChunk>;

/// Errors from running a step command.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProcessError {
    #[snafu(display("failed to start `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` exited with code {code}"))]
    Exit { command: String, code: i32 },

    #[snafu(display("failed waiting for `{command}`: {source}"))]
    Wait {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` was cancelled"))]
    Cancelled { command: String },
}

impl ProcessError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }

    /// Exit code, if the process ran to completion with a failure status.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Executes external commands for pipeline steps.
///
/// At most one attached process runs at a time; `cancel` terminates it.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run `invocation` to completion, forwarding output chunks as they arrive.
    async fn run(&self, invocation: &Invocation, output: OutputSender) -> Result<(), ProcessError>;

    /// Start `invocation` without waiting for it. The process outlives the caller.
    fn spawn_detached(&self, invocation: &Invocation) -> Result<(), ProcessError>;

    /// Terminate the active process, if any. Returns whether one was signalled.
    fn cancel(&self) -> bool;
}
