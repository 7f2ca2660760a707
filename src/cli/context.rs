use crate::client::{HttpGridClient, MemoryGrid, RacedClient, RemoteReader, RequestClient, ServerStatus};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::model::ResourceId;
use crate::session::SessionManager;
use crate::storage::checkpoint::default_slot;
use crate::storage::{CheckpointStore, MemoryStorage};
use std::sync::Arc;
use tracing::info;

struct Transport {
    client: Arc<dyn RequestClient>,
    reader: Arc<dyn RemoteReader>,
    server_status: Arc<dyn ServerStatus>,
}

impl Transport {
    fn memory() -> Self {
        let grid = Arc::new(MemoryGrid::new());
        Transport {
            client: grid.clone(),
            reader: grid.clone(),
            server_status: grid,
        }
    }

    /// Writes are raced over the primary and fallback endpoints; reads and
    /// status queries only go to the primary.
    fn http(config: &Config, resource: &ResourceId) -> Result<Self, reqwest::Error> {
        let remote = &config.remote;
        let primary = Arc::new(HttpGridClient::new(&remote.url, remote, resource.clone())?);

        let secondary: Option<Arc<dyn RequestClient>> = match &remote.fallback_url {
            Some(url) => {
                info!(fallback_url = %url, "Racing writes over a fallback endpoint");
                Some(Arc::new(HttpGridClient::new(url, remote, resource.clone())?))
            }
            None => None,
        };

        Ok(Transport {
            client: Arc::new(RacedClient::new(primary.clone(), secondary)),
            reader: primary.clone(),
            server_status: primary,
        })
    }
}

/// Checkpoint store for `config`; in memory when checkpointing is disabled.
pub fn checkpoint_store(config: &Config, dry_run: bool) -> CheckpointStore {
    if dry_run || !config.checkpoint.enabled {
        let slot = config.checkpoint.slot.clone().unwrap_or_else(default_slot);
        CheckpointStore::new(Arc::new(MemoryStorage::new()), slot, config.checkpoint.expiry)
    } else {
        CheckpointStore::from_config(&config.checkpoint)
    }
}

/// Everything one CLI command needs to drive a session against `resource`.
pub struct Runtime {
    pub dispatcher: Dispatcher,
    pub manager: SessionManager,
    pub resource: ResourceId,
}

impl Runtime {
    /// A dry run talks to an in-memory grid and never touches the checkpoint directory.
    pub fn new(config: &Config, resource: ResourceId, dry_run: bool) -> Result<Self, reqwest::Error> {
        let transport = if dry_run {
            Transport::memory()
        } else {
            Transport::http(config, &resource)?
        };
        let store = Arc::new(checkpoint_store(config, dry_run));

        let dispatcher = Dispatcher::builder(transport.client, store)
            .limiter(config.limiter.clone())
            .config(config.dispatch.clone())
            .server_status(transport.server_status.clone())
            .build();

        let manager = SessionManager::new(dispatcher.clone(), transport.reader, config.validation.clone())
            .with_server_status(transport.server_status);

        Ok(Self {
            dispatcher,
            manager,
            resource,
        })
    }
}
