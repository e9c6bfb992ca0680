use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileMessageStore, MemoryMessageStore, store::MessageStore};

/// Which queue backend to use
///
/// File-backed queue in RON config:
/// ```ron
/// Postq (
///     queue: File(
///         path: "/var/spool/postq",
///     ),
/// )
/// ```
///
/// In-memory queue, optionally bounded:
/// ```ron
/// Postq (
///     queue: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum QueueConfig {
    File { path: PathBuf },
    Memory {
        /// Maximum number of messages to hold (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::File {
            path: FileMessageStore::default().path().to_path_buf(),
        }
    }
}

impl QueueConfig {
    /// Directory of a file-backed queue
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Initialise the configured backend and hand it out as a trait object
    ///
    /// # Errors
    /// If a file-backed queue directory is unsafe or cannot be created
    pub async fn into_store(self) -> crate::Result<Arc<dyn MessageStore>> {
        match self {
            Self::File { path } => {
                let store = FileMessageStore::new(path)?;
                store.init().await?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryMessageStore::new()) as Arc<dyn MessageStore>,
                |capacity| Arc::new(MemoryMessageStore::with_capacity(capacity)),
            )),
        }
    }
}

impl QueueConfig {
    /// Open the configured backend without preparing it
    ///
    /// Nothing on disk is created or cleaned up, so this is safe next to a
    /// running daemon whose temp files may be mid-rename.
    ///
    /// # Errors
    /// If a file-backed queue directory is unsafe
    pub fn open_read_only(self) -> crate::Result<Arc<dyn MessageStore>> {
        match self {
            Self::File { path } => Ok(Arc::new(FileMessageStore::new(path)?)),
            Self::Memory { .. } => Ok(Arc::new(MemoryMessageStore::new())),
        }
    }
}
