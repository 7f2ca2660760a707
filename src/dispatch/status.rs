use crate::client::FailureKind;
use crate::model::SessionId;
use serde::Serialize;
use std::time::Duration;

/// Where the dispatch loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "detail")]
pub enum DispatchPhase {
    Idle,
    Running,
    /// Handling the result of the last send.
    Draining(Drain),
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Drain {
    Confirmed,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Cancelled,
    InsufficientResource,
}

/// Read-only view of a dispatcher for consumers.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatus {
    pub phase: DispatchPhase,
    pub running: bool,
    pub queue_depth: usize,
    pub original_count: usize,
    pub completed: u64,
    pub errors: u64,
    pub dropped: u64,
    pub current_burst_usage: usize,
    pub burst_quota: usize,
    pub sends_last_minute: usize,
    pub session_id: Option<SessionId>,
    pub has_resumable_checkpoint: bool,
}

/// Periodic progress signal published while draining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub session_id: SessionId,
    pub completed: u64,
    pub errors: u64,
    pub remaining: usize,
    pub original: usize,
}

/// Summary of one call to `Dispatcher::run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub session_id: SessionId,
    pub outcome: StopReason,
    pub completed: u64,
    pub errors: u64,
    pub dropped: u64,
    pub remaining: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}
