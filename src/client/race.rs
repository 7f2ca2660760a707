use super::traits::{RequestClient, SendError};
use crate::model::Operation;
use async_trait::async_trait;
use futures::future::{self, Either};
use std::sync::Arc;

/// Sends each write over two transports at once; whichever settles first wins
/// and the other request is dropped (cancelled) before it can be observed.
pub struct RacedClient {
    primary: Arc<dyn RequestClient>,
    secondary: Option<Arc<dyn RequestClient>>,
}

impl RacedClient {
    pub fn new(primary: Arc<dyn RequestClient>, secondary: Option<Arc<dyn RequestClient>>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl RequestClient for RacedClient {
    async fn send(&self, op: &Operation) -> Result<(), SendError> {
        let Some(secondary) = &self.secondary else {
            return self.primary.send(op).await;
        };

        let primary = self.primary.send(op);
        let secondary = secondary.send(op);

        match future::select(primary, secondary).await {
            Either::Left((result, loser)) => {
                drop(loser);
                tracing::trace!(winner = self.primary.name(), ok = result.is_ok(), "Write settled");
                result
            }
            Either::Right((result, loser)) => {
                drop(loser);
                tracing::trace!(winner = "secondary", ok = result.is_ok(), "Write settled");
                result
            }
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}
