// ABOUTME: File-backed state store keeping one JSON document per slot.
// ABOUTME: Writes are atomic (temp file + rename) and entries carry their own expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{DeploymentState, Slot, StateStore, StoreError, timestamp};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    #[serde(with = "timestamp")]
    expires_at: DateTime<Utc>,
    state: T,
}

/// State store persisting snapshots under a directory, e.g. `.rollout/state/current.json`.
pub struct FileStateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("{}.json", slot.name()))
    }

    async fn remove(&self, path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn set(
        &self,
        slot: Slot,
        state: Option<&DeploymentState>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.slot_path(slot);

        let Some(state) = state else {
            return self.remove(&path).await;
        };

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Backend(format!("invalid ttl: {e}")))?;
        let envelope = Envelope {
            expires_at: timestamp::now() + ttl,
            state,
        };
        let payload = serde_json::to_vec_pretty(&envelope)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{}.json.tmp", slot.name()));
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(slot = %slot, path = %path.display(), "persisted deployment state");
        Ok(())
    }

    async fn get(&self, slot: Slot) -> Result<Option<DeploymentState>, StoreError> {
        let path = self.slot_path(slot);
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope<DeploymentState> = serde_json::from_slice(&payload)?;
        if envelope.expires_at <= Utc::now() {
            tracing::debug!(slot = %slot, "discarding expired deployment state");
            let _guard = self.write_lock.lock().await;
            self.remove(&path).await?;
            return Ok(None);
        }

        Ok(Some(envelope.state))
    }
}
