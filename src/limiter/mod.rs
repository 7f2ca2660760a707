//! Dual-window admission control: a minimum gap between consecutive sends
//! plus a sliding burst quota.

use crate::config::types::LimiterConfig;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const REPORTING_WINDOW: Duration = Duration::from_secs(60);

/// Rolling send logs guarded by the limiter's lock.
#[derive(Debug, Default)]
struct SendLog {
    burst_quota: usize,
    burst: VecDeque<Instant>,
    last_minute: VecDeque<Instant>,
    last_send: Option<Instant>,
}

impl SendLog {
    fn evict(&mut self, now: Instant, burst_window: Duration) {
        while let Some(&t) = self.burst.front() {
            if now.saturating_duration_since(t) >= burst_window {
                self.burst.pop_front();
            } else {
                break;
            }
        }
        while let Some(&t) = self.last_minute.front() {
            if now.saturating_duration_since(t) >= REPORTING_WINDOW {
                self.last_minute.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Admission gate shared by the dispatch loop and status readers.
///
/// The lock is never held across a sleep, so status reads stay cheap while
/// `admit` is waiting.
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    burst_window: Duration,
    burst_safety_margin: Duration,
    jitter_min: Duration,
    jitter_max: Duration,
    log: Mutex<SendLog>,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            min_spacing: config.min_spacing,
            burst_window: config.burst_window,
            burst_safety_margin: config.burst_safety_margin,
            jitter_min: config.jitter_min,
            jitter_max: config.jitter_max,
            log: Mutex::new(SendLog {
                burst_quota: config.burst_quota.max(1),
                ..SendLog::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SendLog> {
        // A poisoned log only means a panic elsewhere; the timestamps are still usable.
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until one more send is allowed, then record it.
    pub async fn admit(&self) {
        let mut jittered = false;
        loop {
            let wait = {
                let mut log = self.lock();
                let now = Instant::now();
                log.evict(now, self.burst_window);
                match self.required_wait(&log, now) {
                    Some(wait) => Some(wait),
                    None if jittered => {
                        log.last_send = Some(now);
                        log.burst.push_back(now);
                        log.last_minute.push_back(now);
                        return;
                    }
                    None => None,
                }
            };

            match wait {
                Some(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "Admission delayed");
                    tokio::time::sleep(wait).await;
                }
                None => {
                    jittered = true;
                    let jitter = self.jitter();
                    if !jitter.is_zero() {
                        tokio::time::sleep(jitter).await;
                    }
                }
            }
        }
    }

    fn required_wait(&self, log: &SendLog, now: Instant) -> Option<Duration> {
        if log.burst.len() >= log.burst_quota {
            // The entry that has to leave the window before one more send fits.
            let blocking = log.burst[log.burst.len() - log.burst_quota];
            let elapsed = now.saturating_duration_since(blocking);
            let wait = (self.burst_window + self.burst_safety_margin).saturating_sub(elapsed);
            if !wait.is_zero() {
                return Some(wait);
            }
        }

        if let Some(last) = log.last_send {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_spacing {
                return Some(self.min_spacing - elapsed);
            }
        }

        None
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Forget the burst window. Used when the server reports a burst limit
    /// despite local accounting.
    pub fn reset_burst(&self) {
        let mut log = self.lock();
        tracing::debug!(cleared = log.burst.len(), "Burst log reset");
        log.burst.clear();
    }

    /// Lower the burst quota. Never raises it.
    pub fn tighten(&self, quota: usize) -> bool {
        let mut log = self.lock();
        let quota = quota.max(1);
        if quota < log.burst_quota {
            tracing::info!(from = log.burst_quota, to = quota, "Tightening burst quota");
            log.burst_quota = quota;
            // The log never holds more than the quota; forget the oldest sends.
            while log.burst.len() > quota {
                log.burst.pop_front();
            }
            true
        } else {
            false
        }
    }

    pub fn burst_quota(&self) -> usize {
        self.lock().burst_quota
    }

    pub fn burst_window(&self) -> Duration {
        self.burst_window
    }

    /// Sends counted against the current burst window.
    pub fn burst_usage(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .burst
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < self.burst_window)
            .count()
    }

    pub fn sends_last_minute(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .last_minute
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < REPORTING_WINDOW)
            .count()
    }
}
