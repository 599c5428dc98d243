// ABOUTME: Feature-flag gate consulted once before a deployment executes any step.
// ABOUTME: Provides a static gate and a YAML flags-file gate that can be flipped without a restart.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Boolean feature-flag query.
#[async_trait]
pub trait FeatureGate: Send + Sync {
    /// Whether the flag `namespace`/`key` is switched off.
    async fn is_disabled(&self, namespace: &str, key: &str) -> bool;
}

/// Gate answering from a fixed set of disabled flags.
#[derive(Default)]
pub struct StaticGate {
    disabled: Mutex<HashSet<(String, String)>>,
}

impl StaticGate {
    /// A gate with every flag enabled.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn with_disabled(namespace: &str, key: &str) -> Self {
        let gate = Self::default();
        gate.set_disabled(namespace, key, true);
        gate
    }

    pub fn set_disabled(&self, namespace: &str, key: &str, disabled: bool) {
        let flag = (namespace.to_string(), key.to_string());
        let mut flags = self.disabled.lock();
        if disabled {
            flags.insert(flag);
        } else {
            flags.remove(&flag);
        }
    }
}

#[async_trait]
impl FeatureGate for StaticGate {
    async fn is_disabled(&self, namespace: &str, key: &str) -> bool {
        self.disabled
            .lock()
            .contains(&(namespace.to_string(), key.to_string()))
    }
}

/// Gate reading a YAML map of `namespace -> key -> disabled` on every query.
///
/// ```yaml
/// deployment:
///   pipeline: true
/// ```
///
/// A missing or unreadable file leaves every flag enabled.
pub struct FileGate {
    path: PathBuf,
}

impl FileGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeatureGate for FileGate {
    async fn is_disabled(&self, namespace: &str, key: &str) -> bool {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                tracing::warn!("cannot read flags file {}: {}", self.path.display(), e);
                return false;
            }
        };

        match serde_yaml::from_str::<HashMap<String, HashMap<String, bool>>>(&content) {
            Ok(flags) => flags
                .get(namespace)
                .and_then(|keys| keys.get(key))
                .copied()
                .unwrap_or(false),
            Err(e) => {
                tracing::warn!("invalid flags file {}: {}", self.path.display(), e);
                false
            }
        }
    }
}
