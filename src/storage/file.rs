use super::traits::{Storage, StorageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One JSON file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        let name: String = slot
            .chars()
            .map(|c| if is_slot_char(c) { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

fn is_slot_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// True when `slot` maps to a file name unchanged, so distinct slots never share a file.
pub fn is_plain_slot(slot: &str) -> bool {
    !slot.is_empty() && !slot.starts_with('.') && slot.chars().all(is_slot_char)
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, slot: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.slot_path(slot)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, slot: &str, data: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write beside the target then rename so a crash never leaves a torn file.
        let path = self.slot_path(slot);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, slot: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.slot_path(slot)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));

        assert!(storage.read("session").await.unwrap().is_none());

        storage.write("session", "{\"a\":1}").await.unwrap();
        assert_eq!(storage.read("session").await.unwrap().as_deref(), Some("{\"a\":1}"));

        storage.remove("session").await.unwrap();
        assert!(storage.read("session").await.unwrap().is_none());
        storage.remove("session").await.unwrap();
    }

    #[test]
    fn test_plain_slots() {
        assert!(is_plain_slot("session-kiosk_1.local"));
        assert!(!is_plain_slot(""));
        assert!(!is_plain_slot("a/b"));
        assert!(!is_plain_slot("..hidden"));
        assert!(!is_plain_slot("with space"));
    }

    #[tokio::test]
    async fn test_slot_names_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.write("../escape/slot", "x").await.unwrap();

        assert!(dir.path().join(".._escape_slot.json").exists());
        assert_eq!(storage.read("../escape/slot").await.unwrap().as_deref(), Some("x"));
    }
}
