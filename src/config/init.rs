// ABOUTME: Config scaffolding for new installations.
// ABOUTME: Writes a commented rollout.yml template.

use std::path::Path;

use crate::error::{Error, Result};

use super::CONFIG_FILENAME;

/// Starting point written by `rollout init`; every value shown is the default.
pub const TEMPLATE: &str = r#"# rollout configuration
state:
  # file | memory | redis
  backend: file
  dir: .rollout/state
  # url: { env: ROLLOUT_REDIS_URL, default: "redis://127.0.0.1/" }
  # Snapshots are kept at least this long.
  ttl: 24h

projects_file: .rollout/projects.yml

# Value of the {deploy_path} working directory.
# deploy_path: { env: DEPLOY_PATH }

pipeline:
  max_attempts: 3
  retry_backoff: 2s

gate:
  namespace: deployment
  key: pipeline
  disabled: false
  # flags_file: .rollout/flags.yml

notify:
  recipients: []
  subject_prefix: "[rollout]"
"#;

pub fn init_config(dir: &Path, force: bool) -> Result<std::path::PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, TEMPLATE)?;
    Ok(config_path)
}
