// ABOUTME: Configuration types and parsing for rollout.yml.
// ABOUTME: Handles discovery, YAML parsing, env var interpolation, and path resolution.

mod env_value;
mod init;

pub use env_value::EnvValue;
pub use init::{TEMPLATE, init_config};

use crate::deploy::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF, EngineSettings, MIN_STATE_TTL};
use crate::error::{Error, Result};
use crate::notify::format_duration;
use crate::project::PathContext;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "rollout.yml";
pub const CONFIG_FILENAME_ALT: &str = "rollout.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".rollout/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub state: StateConfig,

    #[serde(default = "default_projects_file")]
    pub projects_file: PathBuf,

    /// Value of the `{deploy_path}` working-directory placeholder.
    #[serde(default)]
    pub deploy_path: Option<EnvValue>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    File,
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,

    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,

    /// Connection URL for the redis backend.
    #[serde(default)]
    pub url: Option<EnvValue>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_state_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            dir: default_state_dir(),
            url: None,
            key_prefix: default_key_prefix(),
            ttl: default_state_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_gate_namespace")]
    pub namespace: String,

    #[serde(default = "default_gate_key")]
    pub key: String,

    /// Statically switch the pipeline off.
    #[serde(default)]
    pub disabled: bool,

    /// YAML file of `namespace -> key -> disabled`, re-read before every deployment.
    #[serde(default)]
    pub flags_file: Option<PathBuf>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            namespace: default_gate_namespace(),
            key: default_gate_key(),
            disabled: false,
            flags_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

fn default_projects_file() -> PathBuf {
    PathBuf::from(".rollout/projects.yml")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".rollout/state")
}

fn default_key_prefix() -> String {
    "rollout".to_string()
}

fn default_state_ttl() -> Duration {
    MIN_STATE_TTL
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_backoff() -> Duration {
    DEFAULT_RETRY_BACKOFF
}

fn default_gate_namespace() -> String {
    "deployment".to_string()
}

fn default_gate_key() -> String {
    "pipeline".to_string()
}

fn default_subject_prefix() -> String {
    "[rollout]".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            projects_file: default_projects_file(),
            deploy_path: None,
            pipeline: PipelineConfig::default(),
            gate: GateConfig::default(),
            notify: NotifyConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = config_base_dir(path);
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Defaults rooted at `dir`, used when no config file exists.
    pub fn defaults_in(dir: &Path) -> Self {
        Self {
            base_dir: dir.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "pipeline.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.state.ttl < MIN_STATE_TTL {
            return Err(Error::InvalidConfig(format!(
                "state.ttl must be at least {}",
                format_duration(MIN_STATE_TTL)
            )));
        }
        if self.state.backend == StateBackend::Redis && self.state.url.is_none() {
            return Err(Error::InvalidConfig(
                "state.url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve `path` against the config file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve_path(&self.state.dir)
    }

    pub fn projects_path(&self) -> PathBuf {
        self.resolve_path(&self.projects_file)
    }

    pub fn flags_path(&self) -> Option<PathBuf> {
        self.gate.flags_file.as_deref().map(|p| self.resolve_path(p))
    }

    pub fn deploy_path(&self) -> Result<Option<String>> {
        self.deploy_path.as_ref().map(EnvValue::resolve).transpose()
    }

    pub fn state_url(&self) -> Result<Option<String>> {
        self.state.url.as_ref().map(EnvValue::resolve).transpose()
    }

    /// Engine tunables, with `cwd` as the value of the `{cwd}` placeholder.
    pub fn engine_settings(&self, cwd: &Path) -> Result<EngineSettings> {
        Ok(EngineSettings {
            max_attempts: self.pipeline.max_attempts,
            retry_backoff: self.pipeline.retry_backoff,
            state_ttl: self.state.ttl,
            paths: PathContext {
                cwd: cwd.to_path_buf(),
                deploy_path: self.deploy_path()?,
            },
            gate_namespace: self.gate.namespace.clone(),
            gate_key: self.gate.key.clone(),
        })
    }
}

/// Directory holding the config file; `.rollout/config.yml` counts as the project root.
fn config_base_dir(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    if path.ends_with(CONFIG_FILENAME_DIR) {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}
