// ABOUTME: Redis-backed state store (cargo feature `redis`).
// ABOUTME: Uses SET EX / GET / DEL on prefixed keys so orphaned state expires on its own.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use super::{DeploymentState, Slot, StateStore, StoreError};

pub struct RedisStateStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStateStore {
    pub fn new(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, slot: Slot) -> String {
        format!("{}:deployment:{}", self.prefix, slot.name())
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn set(
        &self,
        slot: Slot,
        state: Option<&DeploymentState>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(slot);
        match state {
            Some(state) => {
                let payload = serde_json::to_string(state)?;
                conn.set_ex::<_, _, ()>(&key, payload, ttl.as_secs().max(1))
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))
            }
            None => conn
                .del::<_, ()>(&key)
                .await
                .map_err(|e| StoreError::Backend(e.to_string())),
        }
    }

    async fn get(&self, slot: Slot) -> Result<Option<DeploymentState>, StoreError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .get(self.key(slot))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }
}
