// ABOUTME: Output formatting for CLI feedback and deployment event streams.
// ABOUTME: Supports normal, quiet (CI), JSON lines, and server-sent-event frames.

use serde::Serialize;
use std::time::Instant;

use crate::events::DeploymentEvent;
use crate::notify::format_duration;
use crate::state::{DeploymentState, StepStatus};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
    /// `data: <json>` frames, ready to relay to a browser
    Sse,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Print a progress message (suppressed in quiet/json/sse mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json | OutputMode::Sse => {
                if let Some(json) = self.json_message("success", message) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Error: {message}"),
            OutputMode::Json | OutputMode::Sse => {
                if let Some(json) = self.json_message("error", message) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print one deployment event.
    pub fn event(&self, event: &DeploymentEvent) {
        if let Some(text) = self.render_event(event) {
            print!("{text}");
        }
    }

    /// Print a serializable value: JSON in machine modes, `human` otherwise.
    pub fn value<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => println!("{}", human()),
            OutputMode::Json | OutputMode::Sse => match serde_json::to_string(value) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!("failed to encode output: {e}"),
            },
        }
    }

    /// Text for `event` in this mode, or `None` when the mode hides it.
    pub fn render_event(&self, event: &DeploymentEvent) -> Option<String> {
        match self.mode {
            OutputMode::Json => event.to_json().ok().map(|json| format!("{json}\n")),
            OutputMode::Sse => event.to_sse().ok(),
            OutputMode::Quiet => match event {
                DeploymentEvent::DeploymentComplete { deployment } => {
                    Some(format!("{}\n", summary_line(deployment)))
                }
                _ => None,
            },
            OutputMode::Normal => Some(match event {
                DeploymentEvent::StepStart {
                    step,
                    attempt: Some(attempt),
                    max_attempts: Some(max),
                    ..
                } if *attempt > 1 => format!("  → {step} (attempt {attempt}/{max})\n"),
                DeploymentEvent::StepStart { step, .. } => format!("  → {step}\n"),
                DeploymentEvent::StepOutput { output, .. } => output.clone(),
                DeploymentEvent::StepComplete {
                    step,
                    status,
                    error,
                    ..
                } => match (status, error) {
                    (StepStatus::Success, _) => format!("  ✓ {step}\n"),
                    (StepStatus::Skipped, _) => format!("  - {step} (skipped)\n"),
                    (_, Some(error)) => format!("  ✗ {step}: {error}\n"),
                    (status, None) => format!("  ✗ {step} ({status})\n"),
                },
                DeploymentEvent::DeploymentComplete { deployment } => {
                    format!("{}\n", summary_line(deployment))
                }
            }),
        }
    }

    fn json_message(&self, event: &str, message: &str) -> Option<String> {
        let event = JsonEvent {
            event,
            message,
            duration_secs: self.start_time.map(|_| self.elapsed_secs()),
        };
        serde_json::to_string(&event).ok()
    }
}

/// One-line description of a deployment snapshot.
pub fn summary_line(state: &DeploymentState) -> String {
    let mut line = format!(
        "Deployment {} of {} {}",
        state.id, state.project, state.status
    );
    if let Some(duration) = state.duration() {
        line.push_str(&format!(" in {}", format_duration(duration)));
    }
    if state.is_running() {
        line.push_str(&format!(" (at {})", state.current_step.step));
    } else if let Some(error) = &state.current_step.error
        && state.current_step.status == StepStatus::Failed
    {
        line.push_str(&format!(": {} failed: {error}", state.current_step.step));
    }
    line
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
