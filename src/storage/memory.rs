use super::traits::{Storage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Volatile slots, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, to simulate a full or broken store.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("storage quota exceeded".to_string()))
        } else {
            Ok(())
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, slot: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.slots().get(slot).cloned())
    }

    async fn write(&self, slot: &str, data: &str) -> Result<(), StorageError> {
        self.check()?;
        self.slots().insert(slot.to_string(), data.to_string());
        Ok(())
    }

    async fn remove(&self, slot: &str) -> Result<(), StorageError> {
        self.check()?;
        self.slots().remove(slot);
        Ok(())
    }
}
