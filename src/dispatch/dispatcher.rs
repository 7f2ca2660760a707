use super::error::{DispatchError, Result};
use super::status::{DispatchPhase, DispatchStatus, Drain, Progress, RunReport, StopReason};
use crate::client::{RequestClient, SendError, ServerStatus};
use crate::config::types::{DispatchConfig, FailurePolicy, LimiterConfig};
use crate::limiter::RateLimiter;
use crate::model::{Operation, PendingOperation, ResourceId, Session, SessionId};
use crate::storage::CheckpointStore;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct DispatcherBuilder {
    client: Arc<dyn RequestClient>,
    store: Arc<CheckpointStore>,
    limiter: LimiterConfig,
    config: DispatchConfig,
    server_status: Option<Arc<dyn ServerStatus>>,
}

impl DispatcherBuilder {
    pub fn new(client: Arc<dyn RequestClient>, store: Arc<CheckpointStore>) -> Self {
        Self {
            client,
            store,
            limiter: LimiterConfig::default(),
            config: DispatchConfig::default(),
            server_status: None,
        }
    }

    pub fn limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of advisory policy hints, polled every `policy_poll_every` confirmations.
    pub fn server_status(mut self, server_status: Arc<dyn ServerStatus>) -> Self {
        self.server_status = Some(server_status);
        self
    }

    pub fn build(self) -> Dispatcher {
        let (progress, _) = watch::channel(None);
        Dispatcher {
            inner: Arc::new(Inner {
                client: self.client,
                store: self.store,
                limiter: RateLimiter::new(&self.limiter),
                config: self.config,
                server_status: self.server_status,
                session: RwLock::new(None),
                phase: Mutex::new(DispatchPhase::Idle),
                running: AtomicBool::new(false),
                wake: Notify::new(),
                progress,
            }),
        }
    }
}

struct Inner {
    client: Arc<dyn RequestClient>,
    store: Arc<CheckpointStore>,
    limiter: RateLimiter,
    config: DispatchConfig,
    server_status: Option<Arc<dyn ServerStatus>>,
    session: RwLock<Option<Session>>,
    phase: Mutex<DispatchPhase>,
    running: AtomicBool,
    /// Wakes a cooldown early when `stop` is called.
    wake: Notify,
    progress: watch::Sender<Option<Progress>>,
}

/// Clears the running flag however `run` exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drains a session's queue through the rate limiter, one send at a time.
///
/// Cloning yields another handle to the same dispatcher, so one task can run
/// the loop while others read status or call `stop`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder(client: Arc<dyn RequestClient>, store: Arc<CheckpointStore>) -> DispatcherBuilder {
        DispatcherBuilder::new(client, store)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.inner.store
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> DispatchPhase {
        *self.inner.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: DispatchPhase) {
        *self.inner.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Progress updates; `None` until the first update of a run.
    pub fn subscribe(&self) -> watch::Receiver<Option<Progress>> {
        self.inner.progress.subscribe()
    }

    /// Create and persist a new session for `operations`. Does not start sending.
    pub async fn start_session(
        &self,
        operations: Vec<Operation>,
        resource: ResourceId,
    ) -> Result<SessionId> {
        let session = Session::new(operations, resource);
        info!(
            session_id = %session.session_id,
            resource = %session.resource,
            operations = session.original_operations.len(),
            "Starting new session"
        );
        self.install(session).await
    }

    /// Install a previously persisted session, e.g. one restored from a checkpoint.
    pub async fn load_session(&self, mut session: Session) -> Result<SessionId> {
        session.active = true;
        info!(
            session_id = %session.session_id,
            remaining = session.remaining(),
            completed = session.completed_count,
            "Loading session"
        );
        self.install(session).await
    }

    async fn install(&self, mut session: Session) -> Result<SessionId> {
        {
            let mut slot = self.inner.session.write().await;
            if self.is_running() {
                return Err(DispatchError::AlreadyRunning);
            }
            session.last_checkpoint_time = Some(Utc::now());
            *slot = Some(session.clone());
            self.set_phase(DispatchPhase::Idle);
            self.inner.progress.send_replace(None);
        }

        // Saved outside the lock so status readers never wait on storage.
        self.inner.store.save(&session).await;
        Ok(session.session_id)
    }

    async fn is_active(&self) -> bool {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.active)
    }

    /// Copy of the current session, if any.
    pub async fn session(&self) -> Option<Session> {
        self.inner.session.read().await.clone()
    }

    /// Start a session and drain it.
    pub async fn dispatch(&self, operations: Vec<Operation>, resource: ResourceId) -> Result<RunReport> {
        self.start_session(operations, resource).await?;
        self.run().await
    }

    /// Ask the loop to exit at its next iteration boundary.
    ///
    /// An in-flight send is allowed to settle first; a pending cooldown is cut short.
    pub async fn stop(&self) {
        if let Some(session) = self.inner.session.write().await.as_mut() {
            if session.active {
                info!(session_id = %session.session_id, "Stop requested");
            }
            session.active = false;
        }
        self.inner.wake.notify_waiters();
    }

    pub async fn status(&self) -> DispatchStatus {
        let has_resumable_checkpoint = self.inner.store.has_resumable().await;
        let session = self.inner.session.read().await;
        let limiter = &self.inner.limiter;

        DispatchStatus {
            phase: self.phase(),
            running: self.is_running(),
            queue_depth: session.as_ref().map_or(0, |s| s.remaining()),
            original_count: session.as_ref().map_or(0, |s| s.original_operations.len()),
            completed: session.as_ref().map_or(0, |s| s.completed_count),
            errors: session.as_ref().map_or(0, |s| s.error_count),
            dropped: session.as_ref().map_or(0, |s| s.dropped_count),
            current_burst_usage: limiter.burst_usage(),
            burst_quota: limiter.burst_quota(),
            sends_last_minute: limiter.sends_last_minute(),
            session_id: session.as_ref().map(|s| s.session_id),
            has_resumable_checkpoint,
        }
    }

    /// Drain the loaded session until its queue is empty or it is stopped.
    pub async fn run(&self) -> Result<RunReport> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DispatchError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.inner.running);
        let started = Instant::now();

        let session_id = {
            let session = self.inner.session.read().await;
            let session = session.as_ref().ok_or(DispatchError::NoSession)?;
            info!(
                session_id = %session.session_id,
                remaining = session.remaining(),
                "Dispatch loop started"
            );
            session.session_id
        };
        self.set_phase(DispatchPhase::Running);

        let mut since_checkpoint = 0u64;
        let outcome = loop {
            let head = {
                let session = self.inner.session.read().await;
                let session = session.as_ref().ok_or(DispatchError::NoSession)?;
                if !session.active {
                    break StopReason::Cancelled;
                }
                match session.pending_queue.front() {
                    Some(head) => *head,
                    None => break StopReason::Completed,
                }
            };

            self.set_phase(DispatchPhase::Running);
            let woken = self.inner.wake.notified();
            tokio::select! {
                _ = self.inner.limiter.admit() => {}
                _ = woken => debug!("Admission wait interrupted by stop"),
            }
            // A stop during admission must not cost another write.
            if !self.is_active().await {
                break StopReason::Cancelled;
            }

            let result = match tokio::time::timeout(
                self.inner.config.send_timeout,
                self.inner.client.send(&head.op),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SendError::Timeout),
            };

            match result {
                Ok(()) => {
                    let completed = self.confirm_head().await?;
                    self.set_phase(DispatchPhase::Draining(Drain::Confirmed));

                    since_checkpoint += 1;
                    if since_checkpoint >= self.inner.config.checkpoint_every.max(1) {
                        self.checkpoint().await;
                        since_checkpoint = 0;
                    }
                    if completed % self.inner.config.progress_every.max(1) == 0 {
                        self.publish_progress().await;
                    }
                    let poll_every = self.inner.config.policy_poll_every;
                    if poll_every > 0 && completed % poll_every == 0 {
                        self.poll_policy().await;
                    }
                }
                Err(error) => {
                    warn!(
                        session_id = %session_id,
                        key = %head.op.key,
                        attempts = head.attempts + 1,
                        error = %error,
                        "Send failed"
                    );
                    self.fail_head(&error).await?;
                    self.set_phase(DispatchPhase::Draining(Drain::Failed(error.kind())));

                    // Failures are persisted right away so a crash never loses them.
                    self.checkpoint().await;
                    since_checkpoint = 0;

                    match error {
                        SendError::InsufficientResource => {
                            warn!(session_id = %session_id, "Insufficient resource, stopping session");
                            break StopReason::InsufficientResource;
                        }
                        SendError::BurstLimited => {
                            self.inner.limiter.reset_burst();
                            self.cool_down(self.inner.config.burst_cooldown).await;
                        }
                        SendError::RateLimited => {
                            self.cool_down(self.inner.config.rate_limit_cooldown).await;
                        }
                        SendError::Timeout | SendError::Malformed(_) | SendError::Other(_) => {
                            self.cool_down(self.inner.config.error_backoff).await;
                        }
                    }
                }
            }
        };

        self.finish(outcome, started.elapsed()).await
    }

    /// Remove the confirmed head. Returns the session's completed count.
    async fn confirm_head(&self) -> Result<u64> {
        let mut slot = self.inner.session.write().await;
        let session = slot.as_mut().ok_or(DispatchError::NoSession)?;
        session.pending_queue.pop_front();
        session.completed_count += 1;
        Ok(session.completed_count)
    }

    /// Record a failed send of the head and resolve it according to the failure policy.
    async fn fail_head(&self, error: &SendError) -> Result<()> {
        let mut slot = self.inner.session.write().await;
        let session = slot.as_mut().ok_or(DispatchError::NoSession)?;
        session.error_count += 1;

        if error.is_fatal() {
            session.active = false;
            if self.inner.config.failure_policy == FailurePolicy::Drop {
                session.pending_queue.pop_front();
                session.dropped_count += 1;
            }
            return Ok(());
        }

        let Some(head) = session.pending_queue.pop_front() else {
            return Ok(());
        };
        match self.inner.config.failure_policy {
            FailurePolicy::Drop => {
                session.dropped_count += 1;
            }
            FailurePolicy::Requeue { max_retries } => {
                let retried = PendingOperation {
                    op: head.op,
                    attempts: head.attempts + 1,
                };
                if retried.attempts > max_retries {
                    warn!(key = %head.op.key, attempts = retried.attempts, "Retry limit reached, dropping operation");
                    session.dropped_count += 1;
                } else {
                    session.pending_queue.push_back(retried);
                }
            }
        }
        Ok(())
    }

    async fn checkpoint(&self) {
        let snapshot = {
            let mut slot = self.inner.session.write().await;
            let Some(session) = slot.as_mut() else {
                return;
            };
            session.last_checkpoint_time = Some(Utc::now());
            session.clone()
        };
        self.inner.store.save(&snapshot).await;
    }

    async fn cool_down(&self, duration: Duration) {
        let woken = self.inner.wake.notified();
        if !self.is_active().await || duration.is_zero() {
            return;
        }

        debug!(cooldown_ms = duration.as_millis() as u64, "Cooling down");
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = woken => debug!("Cooldown interrupted by stop"),
        }
    }

    async fn publish_progress(&self) {
        let progress = {
            let session = self.inner.session.read().await;
            let Some(session) = session.as_ref() else {
                return;
            };
            Progress {
                session_id: session.session_id,
                completed: session.completed_count,
                errors: session.error_count,
                remaining: session.remaining(),
                original: session.original_operations.len(),
            }
        };
        info!(
            session_id = %progress.session_id,
            completed = progress.completed,
            remaining = progress.remaining,
            errors = progress.errors,
            sends_last_minute = self.inner.limiter.sends_last_minute(),
            "Dispatch progress"
        );
        self.inner.progress.send_replace(Some(progress));
    }

    /// Hints can only make the limiter stricter; we keep half of what the server allows.
    async fn poll_policy(&self) {
        let Some(status) = &self.inner.server_status else {
            return;
        };
        let Some(hint) = status.policy_hint().await else {
            return;
        };
        debug!(tier = ?hint.tier, burst_quota = ?hint.burst_quota, "Received policy hint");
        if let Some(quota) = hint.burst_quota {
            self.inner.limiter.tighten((quota / 2).max(1));
        }
        if let Some(window) = hint.burst_window {
            if window > self.inner.limiter.burst_window() {
                warn!(
                    server_window_ms = window.as_millis() as u64,
                    local_window_ms = self.inner.limiter.burst_window().as_millis() as u64,
                    "Server burst window is longer than the local one"
                );
            }
        }
    }

    async fn finish(&self, outcome: StopReason, elapsed: Duration) -> Result<RunReport> {
        let snapshot = {
            let mut slot = self.inner.session.write().await;
            let session = slot.as_mut().ok_or(DispatchError::NoSession)?;
            if session.is_drained() {
                session.active = false;
            }
            session.last_checkpoint_time = Some(Utc::now());
            session.clone()
        };

        if snapshot.is_drained() {
            self.inner.store.clear().await;
            self.inner.store.archive(&snapshot).await;
            info!(
                session_id = %snapshot.session_id,
                completed = snapshot.completed_count,
                errors = snapshot.error_count,
                dropped = snapshot.dropped_count,
                elapsed_secs = elapsed.as_secs(),
                "Session complete, checkpoint cleared"
            );
        } else {
            self.inner.store.save(&snapshot).await;
            warn!(
                session_id = %snapshot.session_id,
                reason = ?outcome,
                remaining = snapshot.remaining(),
                completed = snapshot.completed_count,
                errors = snapshot.error_count,
                "Session stopped with operations remaining, checkpoint retained"
            );
        }

        self.set_phase(DispatchPhase::Stopped(outcome));
        self.publish_progress().await;

        Ok(RunReport {
            session_id: snapshot.session_id,
            outcome,
            completed: snapshot.completed_count,
            errors: snapshot.error_count,
            dropped: snapshot.dropped_count,
            remaining: snapshot.remaining(),
            elapsed,
        })
    }
}
