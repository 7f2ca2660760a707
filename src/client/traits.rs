use crate::model::{Color, Coord, Operation, Region};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a single failed write, as seen by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("remote did not confirm within the deadline")]
    Timeout,

    #[error("rate limited by remote")]
    RateLimited,

    #[error("burst limit reached on remote")]
    BurstLimited,

    #[error("insufficient resource to continue")]
    InsufficientResource,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("remote error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    BurstLimited,
    InsufficientResource,
    Malformed,
    Other,
}

impl SendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SendError::Timeout => FailureKind::Timeout,
            SendError::RateLimited => FailureKind::RateLimited,
            SendError::BurstLimited => FailureKind::BurstLimited,
            SendError::InsufficientResource => FailureKind::InsufficientResource,
            SendError::Malformed(_) => FailureKind::Malformed,
            SendError::Other(_) => FailureKind::Other,
        }
    }

    /// Only an exhausted budget ends a session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SendError::InsufficientResource)
    }

    /// Classify a free-text error reported by the remote.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("burst") {
            SendError::BurstLimited
        } else if lower.contains("insufficient")
            || lower.contains("not enough")
            || lower.contains("no charges")
        {
            SendError::InsufficientResource
        } else if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("limit")
        {
            SendError::RateLimited
        } else if lower.contains("timeout") || lower.contains("timed out") {
            SendError::Timeout
        } else {
            SendError::Other(message.to_string())
        }
    }

    /// Classify an HTTP status plus body text.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => match SendError::classify(body) {
                SendError::BurstLimited => SendError::BurstLimited,
                _ => SendError::RateLimited,
            },
            402 => SendError::InsufficientResource,
            408 | 504 => SendError::Timeout,
            _ => SendError::classify(body),
        }
    }
}

/// Advisory admission policy advertised by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyHint {
    pub tier: Option<String>,
    pub burst_quota: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    pub burst_window: Option<Duration>,
}

/// Performs one remote write.
#[async_trait]
pub trait RequestClient: Send + Sync {
    async fn send(&self, op: &Operation) -> Result<(), SendError>;

    fn name(&self) -> &str {
        "remote"
    }
}

/// Authoritative read of remote state, used by validation.
#[async_trait]
pub trait RemoteReader: Send + Sync {
    async fn read_region(&self, region: Region) -> Result<HashMap<Coord, Color>, ReadError>;
}

/// Advisory information about the caller's account on the remote.
#[async_trait]
pub trait ServerStatus: Send + Sync {
    /// Remaining write budget, if the remote reports one.
    async fn balance(&self) -> Option<u64>;

    async fn policy_hint(&self) -> Option<PolicyHint>;
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned error status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("region read failed: {0}")]
    Unavailable(String),
}
