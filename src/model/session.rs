use super::operation::{Operation, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Time-ordered session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queue entry: an operation plus the number of failed attempts so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    #[serde(flatten)]
    pub op: Operation,
    #[serde(default)]
    pub attempts: u32,
}

impl From<Operation> for PendingOperation {
    fn from(op: Operation) -> Self {
        Self { op, attempts: 0 }
    }
}

/// Full state of one dispatch run. This is what gets checkpointed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub resource: ResourceId,
    pub original_operations: Vec<Operation>,
    pub pending_queue: VecDeque<PendingOperation>,
    pub completed_count: u64,
    pub error_count: u64,
    /// Operations abandoned after a failure (never confirmed, no longer queued).
    #[serde(default)]
    pub dropped_count: u64,
    pub active: bool,
    pub last_checkpoint_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(operations: Vec<Operation>, resource: ResourceId) -> Self {
        let pending_queue = operations.iter().copied().map(PendingOperation::from).collect();
        Self {
            session_id: SessionId::generate(),
            resource,
            original_operations: operations,
            pending_queue,
            completed_count: 0,
            error_count: 0,
            dropped_count: 0,
            active: true,
            last_checkpoint_time: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending_queue.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending_queue.is_empty()
    }

    /// `completed + dropped + pending == original`
    pub fn is_conserved(&self) -> bool {
        self.completed_count + self.dropped_count + self.pending_queue.len() as u64
            == self.original_operations.len() as u64
    }

    /// Replace the queue with a correction set computed by validation.
    ///
    /// Counts are rebased so that every original operation not in `missing`
    /// is considered completed; the error history is preserved.
    pub fn replace_queue(&mut self, missing: Vec<Operation>) {
        let total = self.original_operations.len() as u64;
        let missing_len = missing.len() as u64;
        self.pending_queue = missing.into_iter().map(PendingOperation::from).collect();
        self.completed_count = total.saturating_sub(missing_len);
        self.dropped_count = 0;
    }
}
