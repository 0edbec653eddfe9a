use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;

use crate::{
    backends::{FileStore, MemoryStore},
    r#trait::{QueueStore, SendLog},
};

/// Where the queue and send log live
///
/// File-backed store in RON config:
/// ```ron
/// Bulkmail (
///     store: File(
///         path: "/var/lib/bulkmail",
///     ),
/// )
/// ```
///
/// Memory-backed store, for development:
/// ```ron
/// Bulkmail (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    File { path: PathBuf },
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: FileStore::default().path().to_path_buf(),
        }
    }
}

/// The queue and send log handles produced from a [`StoreConfig`]
#[derive(Debug, Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub log: Arc<dyn SendLog>,
}

impl StoreConfig {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path } => Some(path.as_path()),
            Self::Memory => None,
        }
    }

    /// Open the configured backend, creating the store directory if needed
    ///
    /// # Errors
    /// Returns an error if the file store path is unsafe or its directory
    /// cannot be initialised
    pub fn open(self) -> crate::Result<Stores> {
        match self {
            Self::File { path } => {
                let store = FileStore::builder().path(path).build()?;
                store.init()?;
                let store = Arc::new(store);
                Ok(Stores {
                    queue: store.clone(),
                    log: store,
                })
            }
            Self::Memory => {
                let store = Arc::new(MemoryStore::new());
                Ok(Stores {
                    queue: store.clone(),
                    log: store,
                })
            }
        }
    }
}
