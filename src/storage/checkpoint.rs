use super::file::FileStorage;
use super::traits::{Storage, StorageError};
use crate::config::types::CheckpointConfig;
use crate::model::{ResourceId, Session, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const CURRENT_VERSION: u32 = 1;

/// Appended to the slot name to form the archive slot.
pub const ARCHIVE_SUFFIX: &str = ".completed";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid checkpoint version: {0}")]
    InvalidVersion(u32),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub session: Session,
}

impl Checkpoint {
    pub fn new(session: Session) -> Self {
        Self {
            version: CURRENT_VERSION,
            timestamp: Utc::now(),
            session,
        }
    }
}

/// What `peek` reports about the stored checkpoint without touching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub session_id: SessionId,
    pub resource: ResourceId,
    pub timestamp: DateTime<Utc>,
    pub remaining: usize,
    pub original: usize,
    pub completed: u64,
    pub errors: u64,
    pub expired: bool,
}

/// Best-effort persistence of the single outstanding session.
///
/// Public operations never fail: storage and serialization errors are logged
/// and treated as "nothing saved" / "nothing found".
pub struct CheckpointStore {
    storage: Arc<dyn Storage>,
    slot: String,
    expiry: Duration,
}

impl CheckpointStore {
    pub fn new(storage: Arc<dyn Storage>, slot: impl Into<String>, expiry: Duration) -> Self {
        Self {
            storage,
            slot: slot.into(),
            expiry,
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        let slot = config.slot.clone().unwrap_or_else(default_slot);
        Self::new(Arc::new(FileStorage::new(&config.dir)), slot, config.expiry)
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    fn archive_slot(&self) -> String {
        format!("{}{}", self.slot, ARCHIVE_SUFFIX)
    }

    fn is_expired(&self, checkpoint: &Checkpoint) -> bool {
        let age = Utc::now().signed_duration_since(checkpoint.timestamp);
        match chrono::Duration::from_std(self.expiry) {
            Ok(expiry) => age > expiry,
            Err(_) => false,
        }
    }

    pub async fn save(&self, session: &Session) -> bool {
        match self.write_slot(&self.slot, session).await {
            Ok(()) => {
                tracing::debug!(
                    session_id = %session.session_id,
                    remaining = session.remaining(),
                    "Checkpoint saved"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Failed to save checkpoint, continuing without it"
                );
                false
            }
        }
    }

    /// Load the checkpointed session. Expired or unreadable checkpoints are purged.
    pub async fn load(&self) -> Option<Session> {
        let checkpoint = match self.read_slot(&self.slot).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                tracing::debug!(slot = %self.slot, "No checkpoint found");
                return None;
            }
            Err(CheckpointError::Storage(e)) => {
                tracing::warn!(slot = %self.slot, error = %e, "Failed to read checkpoint");
                return None;
            }
            Err(e) => {
                tracing::warn!(slot = %self.slot, error = %e, "Discarding unreadable checkpoint");
                self.clear().await;
                return None;
            }
        };

        if self.is_expired(&checkpoint) {
            tracing::warn!(
                session_id = %checkpoint.session.session_id,
                saved_at = %checkpoint.timestamp,
                "Checkpoint expired, discarding"
            );
            self.clear().await;
            return None;
        }

        tracing::info!(
            session_id = %checkpoint.session.session_id,
            saved_at = %checkpoint.timestamp,
            remaining = checkpoint.session.remaining(),
            "Loaded checkpoint"
        );
        Some(checkpoint.session)
    }

    /// Describe the stored checkpoint without purging anything.
    pub async fn peek(&self) -> Option<CheckpointSummary> {
        let checkpoint = self.read_slot(&self.slot).await.ok().flatten()?;
        let session = &checkpoint.session;
        Some(CheckpointSummary {
            session_id: session.session_id,
            resource: session.resource.clone(),
            timestamp: checkpoint.timestamp,
            remaining: session.remaining(),
            original: session.original_operations.len(),
            completed: session.completed_count,
            errors: session.error_count,
            expired: self.is_expired(&checkpoint),
        })
    }

    pub async fn has_resumable(&self) -> bool {
        matches!(self.peek().await, Some(summary) if !summary.expired)
    }

    pub async fn clear(&self) {
        match self.storage.remove(&self.slot).await {
            Ok(()) => tracing::debug!(slot = %self.slot, "Checkpoint cleared"),
            Err(e) => tracing::warn!(slot = %self.slot, error = %e, "Failed to clear checkpoint"),
        }
    }

    /// Keep a finished session around so it can be validated later.
    pub async fn archive(&self, session: &Session) {
        let slot = self.archive_slot();
        if let Err(e) = self.write_slot(&slot, session).await {
            tracing::warn!(slot = %slot, error = %e, "Failed to archive completed session");
        }
    }

    pub async fn load_archived(&self) -> Option<Session> {
        let slot = self.archive_slot();
        match self.read_slot(&slot).await {
            Ok(Some(checkpoint)) if !self.is_expired(&checkpoint) => Some(checkpoint.session),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(slot = %slot, error = %e, "Failed to read archived session");
                None
            }
        }
    }

    async fn write_slot(&self, slot: &str, session: &Session) -> Result<()> {
        let checkpoint = Checkpoint::new(session.clone());
        let data = serde_json::to_string(&checkpoint)?;
        self.storage.write(slot, &data).await?;
        Ok(())
    }

    async fn read_slot(&self, slot: &str) -> Result<Option<Checkpoint>> {
        let Some(data) = self.storage.read(slot).await? else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = serde_json::from_str(&data)?;
        if checkpoint.version != CURRENT_VERSION {
            return Err(CheckpointError::InvalidVersion(checkpoint.version));
        }
        Ok(Some(checkpoint))
    }
}

/// One slot per client identity.
pub fn default_slot() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(|s| format!("session-{}", s)))
        .unwrap_or_else(|| "session".to_string())
}
