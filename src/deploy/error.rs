// ABOUTME: Error types for deployment control operations.
// ABOUTME: Pre-flight failures are returned to the caller; step failures live in the state.

use crate::project::ProjectStoreError;
use crate::state::StoreError;
use crate::types::{DeploymentId, ProjectSlug, StepId};

/// Errors returned by start, resume, retry and cancel.
///
/// Failures of a step while the pipeline runs are not errors here: they are
/// recorded in the deployment state and reported through events.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectSlug),

    #[error("project {0} is disabled")]
    ProjectDisabled(ProjectSlug),

    #[error("project {project} does not deploy branch {branch}")]
    BranchNotTracked { project: ProjectSlug, branch: String },

    #[error("cannot resolve working directory `{work_dir}` for project {project}")]
    WorkDirUnresolved {
        project: ProjectSlug,
        work_dir: String,
    },

    #[error("step {step} of project {project} uses {{process}} but the project has no process name")]
    MissingProcessName { project: ProjectSlug, step: StepId },

    #[error("a deployment is already in progress ({project}, {id})")]
    AlreadyInProgress {
        id: DeploymentId,
        project: ProjectSlug,
    },

    #[error("no deployment is running")]
    NothingToCancel,

    #[error("nothing to retry: {0}")]
    NothingToRetry(String),

    #[error("deployment task ended without reporting a final state")]
    Interrupted,

    #[error(transparent)]
    Projects(#[from] ProjectStoreError),

    #[error("state store error: {0}")]
    State(#[from] StoreError),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    /// The project or its configuration does not allow the deployment.
    Configuration,
    /// Another deployment holds the pipeline, or there is nothing to act on.
    Concurrency,
    /// Project or state storage failed.
    Storage,
    /// The deployment task went away.
    Internal,
}

impl DeployError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::ProjectNotFound(_)
            | DeployError::ProjectDisabled(_)
            | DeployError::BranchNotTracked { .. }
            | DeployError::WorkDirUnresolved { .. }
            | DeployError::MissingProcessName { .. } => DeployErrorKind::Configuration,
            DeployError::AlreadyInProgress { .. }
            | DeployError::NothingToCancel
            | DeployError::NothingToRetry(_) => DeployErrorKind::Concurrency,
            DeployError::Projects(ProjectStoreError::NotFound(_)) => {
                DeployErrorKind::Configuration
            }
            DeployError::Projects(_) | DeployError::State(_) => DeployErrorKind::Storage,
            DeployError::Interrupted => DeployErrorKind::Internal,
        }
    }
}
