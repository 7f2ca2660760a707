use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    /// Optional secondary endpoint raced against `url` for writes.
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            fallback_url: None,
            token: None,
            resource: default_resource(),
            timeout: default_send_timeout(),
        }
    }
}

fn default_resource() -> String {
    "default".to_string()
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Admission policy. Defaults are about half of what the server advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    #[serde(with = "humantime_serde")]
    pub min_spacing: Duration,
    pub burst_quota: usize,
    #[serde(with = "humantime_serde")]
    pub burst_window: Duration,
    #[serde(with = "humantime_serde")]
    pub burst_safety_margin: Duration,
    #[serde(with = "humantime_serde")]
    pub jitter_min: Duration,
    #[serde(with = "humantime_serde")]
    pub jitter_max: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(700),
            burst_quota: 15,
            burst_window: Duration::from_secs(10),
            burst_safety_margin: Duration::from_millis(500),
            jitter_min: Duration::from_millis(50),
            jitter_max: Duration::from_millis(150),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Persist the session after this many confirmed operations.
    pub checkpoint_every: u64,
    /// Emit a progress update after this many confirmed operations.
    pub progress_every: u64,
    #[serde(with = "humantime_serde")]
    pub burst_cooldown: Duration,
    #[serde(with = "humantime_serde")]
    pub rate_limit_cooldown: Duration,
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    pub failure_policy: FailurePolicy,
    /// Query the remote for admission hints every N confirmed operations. 0 disables.
    pub policy_poll_every: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 10,
            progress_every: 50,
            burst_cooldown: Duration::from_secs(15),
            rate_limit_cooldown: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
            send_timeout: default_send_timeout(),
            failure_policy: FailurePolicy::Drop,
            policy_poll_every: 0,
        }
    }
}

/// What happens to an operation whose send failed with a non-fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Remove it from the queue; a later validation pass recovers it.
    Drop,
    /// Move it to the back of the queue until it has failed `max_retries` times.
    Requeue { max_retries: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Slot name; defaults to the host name so each client owns one slot.
    pub slot: Option<String>,
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        let dir = dirs::data_local_dir()
            .map(|d| d.join("gridcast"))
            .unwrap_or_else(|| PathBuf::from(".gridcast"));
        Self {
            enabled: true,
            dir,
            slot: None,
            expiry: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Edge length of the square regions read in one request.
    pub region_size: u32,
    /// Region reads in flight at once.
    pub read_concurrency: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            region_size: 1000,
            read_concurrency: 4,
        }
    }
}
