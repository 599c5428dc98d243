// ABOUTME: Deployable project configuration: ordered step lists and working directories.
// ABOUTME: Steps are a typed list at the storage boundary, never a schema-less blob.

mod defaults;
mod store;
mod yaml;

pub use defaults::{default_projects, seed_defaults};
pub use store::{MemoryProjectStore, ProjectStore, ProjectStoreError};
pub use yaml::YamlProjectStore;

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::state::timestamp;
use crate::types::{ProjectSlug, StepId};

/// Placeholder resolved to the orchestrator's own working directory.
pub const CWD_PLACEHOLDER: &str = "{cwd}";
/// Placeholder resolved to the configured deploy path.
pub const DEPLOY_PATH_PLACEHOLDER: &str = "{deploy_path}";
/// Token in step arguments replaced with the project's process name.
pub const PROCESS_PLACEHOLDER: &str = "{process}";

/// Where a project's commands run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkDir {
    /// The working directory of the orchestrator process.
    CurrentDir,
    /// The deploy path provided by configuration.
    DeployPath,
    Literal(PathBuf),
}

/// Values used to resolve symbolic working directories at run time.
#[derive(Debug, Clone, Default)]
pub struct PathContext {
    pub cwd: PathBuf,
    pub deploy_path: Option<String>,
}

impl WorkDir {
    /// Resolve to a concrete path. Returns `None` when a placeholder has no value.
    pub fn resolve(&self, paths: &PathContext) -> Option<PathBuf> {
        match self {
            WorkDir::CurrentDir if paths.cwd.as_os_str().is_empty() => None,
            WorkDir::CurrentDir => Some(paths.cwd.clone()),
            WorkDir::DeployPath => paths
                .deploy_path
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            WorkDir::Literal(path) => Some(path.clone()),
        }
    }
}

impl fmt::Display for WorkDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkDir::CurrentDir => f.write_str(CWD_PLACEHOLDER),
            WorkDir::DeployPath => f.write_str(DEPLOY_PATH_PLACEHOLDER),
            WorkDir::Literal(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<String> for WorkDir {
    fn from(value: String) -> Self {
        match value.as_str() {
            CWD_PLACEHOLDER => WorkDir::CurrentDir,
            DEPLOY_PATH_PLACEHOLDER => WorkDir::DeployPath,
            _ => WorkDir::Literal(PathBuf::from(value)),
        }
    }
}

impl From<WorkDir> for String {
    fn from(value: WorkDir) -> Self {
        value.to_string()
    }
}

/// One external command of a pipeline. Pure configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub id: StepId,
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// The command restarts the orchestrator's host process; remaining steps
    /// run after the restart.
    #[serde(default, skip_serializing_if = "is_false")]
    pub triggers_restart: bool,
    /// The step runs in the freshly restarted process and verifies the restart.
    #[serde(default, skip_serializing_if = "is_false")]
    pub runs_on_module_init: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl StepConfig {
    pub fn new(id: &str, name: &str, command: &str) -> Self {
        Self {
            id: StepId::new(id),
            name: name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            triggers_restart: false,
            runs_on_module_init: false,
            skip: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn restarting(mut self) -> Self {
        self.triggers_restart = true;
        self
    }

    pub fn on_module_init(mut self) -> Self {
        self.runs_on_module_init = true;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Arguments with `{process}` substituted.
    ///
    /// Returns `None` if an argument references the process name and the
    /// project has none.
    pub fn resolved_args(&self, process_name: Option<&str>) -> Option<Vec<String>> {
        self.args
            .iter()
            .map(|arg| {
                if !arg.contains(PROCESS_PLACEHOLDER) {
                    return Some(arg.clone());
                }
                process_name.map(|name| arg.replace(PROCESS_PLACEHOLDER, name))
            })
            .collect()
    }

    /// Human-readable command line, for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Reasons a project configuration is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("step id `{0}` appears more than once")]
    DuplicateStep(StepId),

    #[error("step `{0}` has an empty command")]
    EmptyCommand(StepId),

    #[error("step `{0}` runs on module init but no earlier step triggers a restart")]
    ModuleInitWithoutRestart(StepId),
}

/// A deployable unit and its ordered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub slug: ProjectSlug,
    pub name: String,
    pub work_dir: WorkDir,
    /// External process name, substituted for `{process}` in step arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(
        serialize_with = "serialize_steps",
        deserialize_with = "deserialize_steps"
    )]
    pub steps: NonEmpty<StepConfig>,
    /// Only pushes to this branch trigger deployments. `None` accepts all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "timestamp::now", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "timestamp::now", with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Project {
    pub fn new(slug: ProjectSlug, name: &str, work_dir: WorkDir, steps: NonEmpty<StepConfig>) -> Self {
        let now = timestamp::now();
        Self {
            slug,
            name: name.to_string(),
            work_dir,
            process_name: None,
            steps,
            branch: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_process_name(mut self, name: &str) -> Self {
        self.process_name = Some(name.to_string());
        self
    }

    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> Result<(), ProjectError> {
        let mut seen = HashSet::new();
        let mut restart_seen = false;

        for step in self.steps.iter() {
            if !seen.insert(&step.id) {
                return Err(ProjectError::DuplicateStep(step.id.clone()));
            }
            if step.command.trim().is_empty() {
                return Err(ProjectError::EmptyCommand(step.id.clone()));
            }
            if step.runs_on_module_init && !restart_seen {
                return Err(ProjectError::ModuleInitWithoutRestart(step.id.clone()));
            }
            restart_seen |= step.triggers_restart;
        }

        Ok(())
    }

    pub fn accepts_branch(&self, branch: &str) -> bool {
        self.branch.as_deref().is_none_or(|b| b == branch)
    }

    pub fn step(&self, id: &StepId) -> Option<&StepConfig> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn position(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    /// Snapshot of the step list from `index` onward.
    pub fn steps_from(&self, index: usize) -> Vec<StepConfig> {
        self.steps.iter().skip(index).cloned().collect()
    }
}

fn serialize_steps<S>(steps: &NonEmpty<StepConfig>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(steps.iter())
}

fn deserialize_steps<'de, D>(deserializer: D) -> Result<NonEmpty<StepConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let steps: Vec<StepConfig> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(steps).ok_or_else(|| serde::de::Error::custom("at least one step is required"))
}
