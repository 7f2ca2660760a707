use async_trait::async_trait;

/// Durable key-value slots holding serialized state.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, slot: &str) -> Result<Option<String>, StorageError>;

    async fn write(&self, slot: &str, data: &str) -> Result<(), StorageError>;

    /// Removing a missing slot is not an error.
    async fn remove(&self, slot: &str) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
