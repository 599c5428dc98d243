// ABOUTME: Application-wide error types for rollout.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::project::ProjectStoreError;
use crate::state::StoreError;
use crate::types::ProjectSlugError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid project slug: {0}")]
    Slug(#[from] ProjectSlugError),

    #[error("deployment {id} failed: {reason}")]
    DeploymentFailed { id: String, reason: String },

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Projects(#[from] ProjectStoreError),

    #[error("state store error: {0}")]
    State(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
