use super::reconcile::find_missing;
use crate::client::{PolicyHint, ReadError, RemoteReader, ServerStatus};
use crate::config::types::ValidationConfig;
use crate::dispatch::{DispatchError, Dispatcher, RunReport};
use crate::model::{Operation, Session, SessionId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("remote read failed during validation: {0}")]
    Read(#[from] ReadError),

    #[error("no session available to validate")]
    NothingToValidate,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// How a restored session is continued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Drain the checkpointed queue as-is.
    Continue,
    /// Rebuild the queue from a comparison against remote state first.
    Validate,
}

/// Advisory pre-flight information. Never blocks a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub required: usize,
    pub balance: Option<u64>,
    /// How many operations the balance falls short by, if known.
    pub deficit: Option<u64>,
    pub hint: Option<PolicyHint>,
}

impl Preflight {
    pub fn has_deficit(&self) -> bool {
        self.deficit.is_some_and(|d| d > 0)
    }
}

/// Restores dispatchers from checkpoints and reconciles them against remote state.
pub struct SessionManager {
    dispatcher: Dispatcher,
    reader: Arc<dyn RemoteReader>,
    server_status: Option<Arc<dyn ServerStatus>>,
    validation: ValidationConfig,
}

impl SessionManager {
    pub fn new(
        dispatcher: Dispatcher,
        reader: Arc<dyn RemoteReader>,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            dispatcher,
            reader,
            server_status: None,
            validation,
        }
    }

    pub fn with_server_status(mut self, server_status: Arc<dyn ServerStatus>) -> Self {
        self.server_status = Some(server_status);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Load the checkpoint into the dispatcher without running it.
    ///
    /// Returns `None` when there is nothing to resume.
    pub async fn rehydrate(&self, mode: ResumeMode) -> Result<Option<SessionId>> {
        if self.dispatcher.is_running() {
            return Err(DispatchError::AlreadyRunning.into());
        }

        let Some(mut session) = self.dispatcher.store().load().await else {
            info!("No resumable checkpoint");
            return Ok(None);
        };

        if mode == ResumeMode::Validate {
            self.reconcile(&mut session).await?;
        }

        info!(
            session_id = %session.session_id,
            mode = ?mode,
            remaining = session.remaining(),
            "Resuming session"
        );
        let session_id = self.dispatcher.load_session(session).await?;
        Ok(Some(session_id))
    }

    /// Restore the checkpointed session and drain it.
    ///
    /// A checkpoint with an empty queue completes immediately without sending.
    pub async fn resume(&self, mode: ResumeMode) -> Result<Option<RunReport>> {
        if self.rehydrate(mode).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.dispatcher.run().await?))
    }

    /// Queue a correction pass for the last session without starting it.
    ///
    /// Uses the dispatcher's current session, falling back to the stored
    /// checkpoint and then to the archived completed session. The session id
    /// is kept. Returns the number of operations queued.
    pub async fn validate_completed(&self) -> Result<usize> {
        if self.dispatcher.is_running() {
            return Err(DispatchError::AlreadyRunning.into());
        }

        let mut session = match self.dispatcher.session().await {
            Some(session) => session,
            None => match self.dispatcher.store().load().await {
                Some(session) => session,
                None => self
                    .dispatcher
                    .store()
                    .load_archived()
                    .await
                    .ok_or(SessionError::NothingToValidate)?,
            },
        };

        self.reconcile(&mut session).await?;
        let queued = session.remaining();
        if queued == 0 {
            info!(session_id = %session.session_id, "Validation found nothing to correct");
        } else {
            warn!(
                session_id = %session.session_id,
                missing = queued,
                "Validation queued a correction pass"
            );
        }
        self.dispatcher.load_session(session).await?;
        Ok(queued)
    }

    /// Operations from `operations` not reflected in remote state.
    pub async fn missing_operations(&self, operations: &[Operation]) -> Result<Vec<Operation>> {
        Ok(find_missing(
            self.reader.as_ref(),
            operations,
            self.validation.region_size,
            self.validation.read_concurrency,
        )
        .await?)
    }

    async fn reconcile(&self, session: &mut Session) -> Result<()> {
        let before = session.remaining();
        let missing = self.missing_operations(&session.original_operations).await?;
        info!(
            session_id = %session.session_id,
            queued_before = before,
            missing = missing.len(),
            "Replacing queue with validated missing set"
        );
        session.replace_queue(missing);
        Ok(())
    }

    /// Compare the remote's reported balance to the work about to be sent.
    pub async fn preflight(&self, required: usize) -> Preflight {
        let (balance, hint) = match &self.server_status {
            Some(status) => (status.balance().await, status.policy_hint().await),
            None => (None, None),
        };

        let deficit = balance.and_then(|b| {
            let required = required as u64;
            (b < required).then_some(required - b)
        });

        if let Some(deficit) = deficit {
            warn!(required, balance = ?balance, deficit, "Balance is lower than the batch size");
        }

        Preflight {
            required,
            balance,
            deficit,
            hint,
        }
    }
}
