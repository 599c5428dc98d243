// ABOUTME: In-process state store holding serialized snapshots with expiry.
// ABOUTME: Used by tests and by the `memory` backend; expiry follows the tokio clock.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{DeploymentState, Slot, StateStore, StoreError};

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// State store backed by a process-local map.
///
/// Snapshots are kept as JSON text so every read yields a fresh copy, exactly
/// like an external store would.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<Slot, Entry>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw payload, bypassing serialization. Lets tests simulate
    /// partial or legacy writes.
    pub fn put_raw(&self, slot: Slot, payload: impl Into<String>, ttl: Duration) {
        self.entries.lock().insert(
            slot,
            Entry {
                payload: payload.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn set(
        &self,
        slot: Slot,
        state: Option<&DeploymentState>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        match state {
            Some(state) => {
                let payload = serde_json::to_string(state)?;
                self.put_raw(slot, payload, ttl);
            }
            None => {
                self.entries.lock().remove(&slot);
            }
        }
        Ok(())
    }

    async fn get(&self, slot: Slot) -> Result<Option<DeploymentState>, StoreError> {
        let payload = {
            let mut entries = self.entries.lock();
            match entries.get(&slot) {
                Some(entry) if entry.expires_at <= Instant::now() => {
                    entries.remove(&slot);
                    None
                }
                Some(entry) => Some(entry.payload.clone()),
                None => None,
            }
        };

        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }
}
