pub mod conversation_store;
pub mod error;
pub mod in_memory_storage;
pub mod json_file_storage;
pub mod storage;

pub use conversation_store::{ConversationStore, ExportedRecord};
pub use error::{StorageError, StorageResult, StoreError, StoreResult};
pub use in_memory_storage::InMemoryStorage;
pub use json_file_storage::{DEFAULT_QUOTA_BYTES, JsonFileStorage};
pub use storage::{BoxFuture, StorageBackend};
