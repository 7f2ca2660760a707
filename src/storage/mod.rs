pub mod checkpoint;
pub mod file;
pub mod memory;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, CheckpointSummary};
pub use file::{is_plain_slot, FileStorage};
pub use memory::MemoryStorage;
pub use traits::{Storage, StorageError};
