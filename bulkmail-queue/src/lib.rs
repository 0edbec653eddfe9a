pub mod backends;
pub mod config;
pub mod error;
pub mod table;
pub mod r#trait;
pub mod types;

pub use backends::{FileStore, FileStoreBuilder, MemoryStore};
pub use config::{StoreConfig, Stores};
pub use error::{QueueError, Result, SerializationError, ValidationError};
pub use r#trait::{QueueStore, SendLog};
pub use types::{
    ClaimToken, DEFAULT_MAX_ATTEMPTS, JobDraft, JobFilter, JobId, JobStatus, LogEntryId,
    QueueJob, QueueStats, SendLogEntry, SendLogFilter, SendOutcome,
};
