// ABOUTME: Runtime deployment and step state, plus the persistence contract for snapshots.
// ABOUTME: The "current" slot of the state store is the source of truth for an in-progress deployment.

mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;
pub mod timestamp;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
#[cfg(feature = "redis")]
pub use redis::RedisStateStore;
pub use store::{Slot, StateStore, StoreError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::project::StepConfig;
use crate::types::{DeploymentId, ProjectSlug, StepId};

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Overall deployment status. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Success,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Runtime state of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub step: StepId,
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default, with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl StepState {
    pub fn pending(config: &StepConfig, max_attempts: u32) -> Self {
        Self {
            step: config.id.clone(),
            name: config.name.clone(),
            status: StepStatus::Pending,
            output: String::new(),
            started_at: None,
            finished_at: None,
            error: None,
            attempt: 1,
            max_attempts,
        }
    }

    /// Enter `running` for the given attempt.
    pub fn begin_attempt(&mut self, attempt: u32) {
        self.status = StepStatus::Running;
        self.attempt = attempt;
        self.started_at = Some(timestamp::now());
        self.finished_at = None;
    }

    pub fn succeed(&mut self) {
        self.status = StepStatus::Success;
        self.error = None;
        self.finished_at = Some(timestamp::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(timestamp::now());
    }

    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.finished_at = Some(timestamp::now());
    }

    /// Put a failed step back to its initial state so it can run again.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.output.clear();
        self.started_at = None;
        self.finished_at = None;
        self.error = None;
        self.attempt = 1;
    }

    pub fn append_output(&mut self, chunk: &str) {
        self.output.push_str(chunk);
    }
}

/// A deployment snapshot: what is persisted in the state store and carried by
/// `deployment_complete` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    pub id: DeploymentId,
    pub project: ProjectSlug,
    pub status: DeploymentStatus,
    pub current_step: StepState,
    #[serde(default)]
    pub completed_steps: BTreeMap<StepId, StepState>,
    #[serde(with = "timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub finished_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
}

impl DeploymentState {
    /// Create a new running deployment positioned at its first step.
    pub fn new(
        project: ProjectSlug,
        first_step: &StepConfig,
        max_attempts: u32,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            id: DeploymentId::generate(),
            project,
            status: DeploymentStatus::Running,
            current_step: StepState::pending(first_step, max_attempts),
            completed_steps: BTreeMap::new(),
            started_at: timestamp::now(),
            finished_at: None,
            triggered_by: triggered_by.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == DeploymentStatus::Running
    }

    /// Move to the next step, leaving it pending.
    pub fn advance_to(&mut self, step: &StepConfig, max_attempts: u32) {
        self.current_step = StepState::pending(step, max_attempts);
    }

    /// Record a copy of the current step in `completed_steps`.
    pub fn archive_current_step(&mut self) {
        self.completed_steps
            .insert(self.current_step.step.clone(), self.current_step.clone());
    }

    pub fn finish(&mut self, status: DeploymentStatus) {
        self.status = status;
        self.finished_at = Some(timestamp::now());
    }

    /// Wall-clock duration, if the deployment has finished.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|finished| (finished - self.started_at).to_std().ok())
    }
}
