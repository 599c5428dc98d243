// ABOUTME: State store contract for persisting deployment snapshots with expiry.
// ABOUTME: Two well-known slots, "current" and "last"; writing None deletes a slot.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use super::DeploymentState;

/// Well-known keys of the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The deployment in progress (or the most recent one, once terminal).
    Current,
    /// The most recently finished deployment.
    Last,
}

impl Slot {
    pub fn name(&self) -> &'static str {
        match self {
            Slot::Current => "current",
            Slot::Last => "last",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from state store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to encode or decode deployment state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store backend error: {0}")]
    Backend(String),
}

/// Fast key-value persistence for deployment snapshots.
///
/// Implementations must store copies: a value read back is never aliased with
/// the value that was written.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `state` under `slot` for `ttl`, or delete the slot when `state` is `None`.
    async fn set(
        &self,
        slot: Slot,
        state: Option<&DeploymentState>,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Read the snapshot stored under `slot`. Expired entries read as `None`.
    async fn get(&self, slot: Slot) -> Result<Option<DeploymentState>, StoreError>;
}
