// ABOUTME: Builds the deployment engine from configuration.
// ABOUTME: Chooses the state backend, feature gate, and notifier the config asks for.

use rollout::config::{Config, StateBackend};
use rollout::deploy::{Collaborators, Deployer};
use rollout::error::Result;
use rollout::gate::{FeatureGate, FileGate, StaticGate};
use rollout::notify::LogNotifier;
use rollout::project::YamlProjectStore;
use rollout::runner::ProcessRunner;
use rollout::state::{FileStateStore, MemoryStateStore, StateStore};
use std::path::Path;
use std::sync::Arc;

/// Wire a Deployer for the CLI, with `cwd` as the `{cwd}` working directory.
pub fn build_deployer(config: &Config, cwd: &Path) -> Result<Deployer> {
    let settings = config.engine_settings(cwd)?;

    let states: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::File => Arc::new(FileStateStore::new(config.state_dir())),
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
        StateBackend::Redis => redis_store(config)?,
    };

    let gate: Arc<dyn FeatureGate> = if config.gate.disabled {
        Arc::new(StaticGate::with_disabled(
            &config.gate.namespace,
            &config.gate.key,
        ))
    } else if let Some(path) = config.flags_path() {
        Arc::new(FileGate::new(path))
    } else {
        Arc::new(StaticGate::open())
    };

    let collaborators = Collaborators {
        projects: Arc::new(YamlProjectStore::new(config.projects_path())),
        states,
        runner: Arc::new(ProcessRunner::new()),
        gate,
        notifier: Arc::new(LogNotifier::new(
            config.notify.recipients.clone(),
            config.notify.subject_prefix.clone(),
        )),
    };
    Ok(Deployer::new(collaborators, settings))
}

#[cfg(feature = "redis")]
fn redis_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    use rollout::error::Error;
    use rollout::state::RedisStateStore;

    let url = config
        .state_url()?
        .ok_or_else(|| Error::InvalidConfig("state.url is required for redis".to_string()))?;
    Ok(Arc::new(RedisStateStore::new(&url, &config.state.key_prefix)?))
}

#[cfg(not(feature = "redis"))]
fn redis_store(_config: &Config) -> Result<Arc<dyn StateStore>> {
    Err(rollout::error::Error::InvalidConfig(
        "the redis state backend requires building with the `redis` feature".to_string(),
    ))
}
