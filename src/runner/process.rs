// ABOUTME: Runs step commands as child processes with tokio::process.
// ABOUTME: Streams stdout/stderr chunk by chunk and kills the active child on cancel.

use async_trait::async_trait;
use parking_lot::Mutex;
use snafu::ResultExt;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{
    CancelledSnafu, ExitSnafu, Invocation, OutputChunk, OutputSender, OutputStream, ProcessError,
    OutputDecoder, SpawnSnafu, StepRunner, WaitSnafu,
};

const READ_BUFFER: usize = 8 * 1024;

/// Environment that keeps tools from emitting colors, spinners, or prompts.
const QUIET_ENV: [(&str, &str); 7] = [
    ("FORCE_COLOR", "0"),
    ("NO_COLOR", "1"),
    ("CI", "true"),
    ("TERM", "dumb"),
    ("NPM_CONFIG_COLOR", "false"),
    ("NPM_CONFIG_PROGRESS", "false"),
    ("GIT_TERMINAL_PROMPT", "0"),
];

/// Environment overrides applied to every step command.
pub fn quiet_env() -> impl Iterator<Item = (&'static str, &'static str)> {
    QUIET_ENV.into_iter()
}

/// Step runner backed by real child processes.
#[derive(Default)]
pub struct ProcessRunner {
    active: Mutex<Option<CancellationToken>>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Clears the active-process slot when a run ends, however it ends.
struct ActiveGuard<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation, output: OutputSender) -> Result<(), ProcessError> {
        let command = invocation.to_string();
        tracing::debug!(command = %command, dir = %invocation.work_dir.display(), "spawning step command");

        let mut child = Command::new(&invocation.command)
            .args(&invocation.args)
            .current_dir(&invocation.work_dir)
            .envs(quiet_env())
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu {
                command: command.clone(),
            })?;

        let token = CancellationToken::new();
        *self.active.lock() = Some(token.clone());
        let _active = ActiveGuard(&self.active);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let wait = async {
            tokio::select! {
                status = child.wait() => Some(status),
                _ = token.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("failed to kill `{}`: {}", command, e);
                    }
                    let _ = child.wait().await;
                    None
                }
            }
        };

        let (status, (), ()) = tokio::join!(
            wait,
            forward(stdout, OutputStream::Stdout, &output, &token),
            forward(stderr, OutputStream::Stderr, &output, &token),
        );

        let Some(status) = status else {
            return CancelledSnafu { command }.fail();
        };

        let status = status.context(WaitSnafu {
            command: command.clone(),
        })?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => ExitSnafu { command, code }.fail(),
            None => {
                // Signal-terminated without our cancel: treated like a clean exit.
                tracing::warn!("`{}` was terminated by a signal", command);
                Ok(())
            }
        }
    }

    fn spawn_detached(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        let mut command = std::process::Command::new(&invocation.command);
        command
            .args(&invocation.args)
            .current_dir(&invocation.work_dir)
            .envs(quiet_env())
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().context(SpawnSnafu {
            command: invocation.to_string(),
        })?;
        tracing::info!(pid = child.id(), "spawned detached `{}`", invocation);

        // Reap the child if it exits while we are still alive.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    fn cancel(&self) -> bool {
        match self.active.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

async fn forward<R>(
    pipe: Option<R>,
    stream: OutputStream,
    output: &OutputSender,
    token: &CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return;
    };

    // The receiver going away only means nobody is listening anymore.
    let send = |text: String| {
        if !text.is_empty() {
            let _ = output.send(OutputChunk { stream, text });
        }
    };

    let mut decoder = OutputDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let read = tokio::select! {
            read = pipe.read(&mut buf) => read,
            _ = token.cancelled() => break,
        };

        match read {
            Ok(0) => break,
            Ok(n) => send(decoder.push(&buf[..n])),
            Err(e) => {
                tracing::warn!("failed reading {:?}: {}", stream, e);
                break;
            }
        }
    }
    send(decoder.finish());
}
