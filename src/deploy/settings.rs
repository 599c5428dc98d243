// ABOUTME: Tunables for the deployment engine.
// ABOUTME: Built from the config file by the CLI, or directly in tests.

use std::time::Duration;

use crate::project::PathContext;

/// Default number of attempts per non-restart step.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay between attempts of a failing step.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// Lower bound for how long deployment snapshots are retained.
pub const MIN_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub state_ttl: Duration,
    pub paths: PathContext,
    pub gate_namespace: String,
    pub gate_key: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            state_ttl: MIN_STATE_TTL,
            paths: PathContext {
                cwd: std::env::current_dir().unwrap_or_default(),
                deploy_path: None,
            },
            gate_namespace: "deployment".to_string(),
            gate_key: "pipeline".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_paths(mut self, paths: PathContext) -> Self {
        self.paths = paths;
        self
    }

    /// Effective retention for snapshots, never below one day.
    pub fn effective_ttl(&self) -> Duration {
        self.state_ttl.max(MIN_STATE_TTL)
    }
}
