//! Backend storage implementations
//!
//! - `memory`: In-process tables for tests and development
//! - `file`: A state index, per-job message files and an append-only send
//!   log, guarded by advisory locks, for production

pub mod file;
pub mod memory;

pub use file::{FileStore, FileStoreBuilder};
pub use memory::MemoryStore;
