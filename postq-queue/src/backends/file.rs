use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use postq_common::internal;
use tokio::fs;

use crate::{MessageId, QueueError, QueuedMessage, store::MessageStore};

const SYSTEM_PREFIXES: [&str; 9] = [
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// Directory-backed queue
///
/// Each message is a pair of files named by its ULID:
/// - `{id}.eml` holds the raw message
/// - `{id}.bin` holds the envelope and delivery state as bincode
///
/// Files are written to a `.tmp_` name and renamed into place, so a crash
/// never leaves a half-written message visible. Anything in the directory
/// that does not look like `{ulid}.bin` is ignored.
#[derive(Debug, Clone)]
pub struct FileMessageStore {
    path: PathBuf,
}

impl Default for FileMessageStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/postq"),
        }
    }
}

impl FileMessageStore {
    /// Create a store rooted at `path` without touching the filesystem
    ///
    /// # Errors
    /// If the path is relative, contains `..`, or points into a system directory
    pub fn new(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;
        Ok(Self { path })
    }

    fn validate_path(path: &Path) -> crate::Result<()> {
        let invalid = |reason: String| QueueError::InvalidDirectory {
            path: path.display().to_string(),
            reason,
        };

        if path.components().any(|c| c == Component::ParentDir) {
            return Err(invalid("cannot contain '..' components".to_string()));
        }

        if !path.is_absolute() {
            return Err(invalid("must be absolute".to_string()));
        }

        if let Some(prefix) = SYSTEM_PREFIXES.iter().find(|p| path.starts_with(p)) {
            return Err(invalid(format!("cannot be inside system directory {prefix}")));
        }

        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directory if needed and clear out stale temp files
    ///
    /// # Errors
    /// If the directory cannot be created, or the path exists and is not a directory
    pub async fn init(&self) -> crate::Result<()> {
        internal!("Initialising queue at {}", self.path.display());

        if !fs::try_exists(&self.path).await? {
            internal!("{} does not exist, creating...", self.path.display());
            fs::create_dir_all(&self.path).await?;
        } else if !fs::metadata(&self.path).await?.is_dir() {
            return Err(QueueError::InvalidDirectory {
                path: self.path.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let mut entries = fs::read_dir(&self.path).await?;
        let mut cleaned = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(".tmp_") {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Removed {cleaned} partially written files from {}",
                self.path.display()
            );
        }

        Ok(())
    }

    fn data_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.eml"))
    }

    fn meta_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    async fn write_atomic(&self, target: &Path, contents: &[u8]) -> crate::Result<()> {
        let Some(name) = target.file_name() else {
            return Err(QueueError::Internal(format!(
                "no file name in {}",
                target.display()
            )));
        };
        let temp = self.path.join(format!(".tmp_{}", name.to_string_lossy()));

        fs::write(&temp, contents).await?;
        fs::rename(&temp, target).await?;
        Ok(())
    }

    async fn write_metadata(&self, message: &QueuedMessage) -> crate::Result<()> {
        let encoded = bincode::serde::encode_to_vec(message, bincode::config::standard())?;
        self.write_atomic(&self.meta_path(&message.id), &encoded)
            .await
    }

    /// IDs of every complete message, oldest first
    async fn ids(&self) -> crate::Result<Vec<MessageId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".bin")
                && let Some(id) = MessageId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn read_metadata(&self, id: &MessageId) -> crate::Result<QueuedMessage> {
        let raw = match fs::read(self.meta_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueueError::NotFound(*id));
            }
            Err(e) => return Err(e.into()),
        };

        let (mut message, _): (QueuedMessage, usize) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())?;
        message.id = *id;
        Ok(message)
    }

    /// Metadata for an ID returned by [`Self::ids`], or `None` to skip it
    ///
    /// A record deleted since the directory was listed is skipped. One that
    /// cannot be decoded is renamed to `{id}.bin.corrupt` so later scans no
    /// longer see it.
    async fn read_listed(&self, id: &MessageId) -> crate::Result<Option<QueuedMessage>> {
        match self.read_metadata(id).await {
            Ok(message) => Ok(Some(message)),
            Err(QueueError::NotFound(_)) => Ok(None),
            Err(QueueError::Serialization(e)) => {
                let corrupt = self.path.join(format!("{id}.bin.corrupt"));
                tracing::warn!(
                    message_id = %id,
                    "Moving undecodable metadata aside to {}: {e}",
                    corrupt.display()
                );
                if let Err(e) = fs::rename(self.meta_path(id), &corrupt).await {
                    tracing::warn!(message_id = %id, "Unable to move corrupt metadata: {e}");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_data(&self, mut message: QueuedMessage) -> crate::Result<QueuedMessage> {
        message.data = Arc::from(fs::read(self.data_path(&message.id)).await?);
        Ok(message)
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn insert(&self, message: QueuedMessage) -> crate::Result<MessageId> {
        let id = message.id;

        self.write_atomic(&self.data_path(&id), &message.data)
            .await?;
        // The metadata file is what makes the message visible, so it goes last
        self.write_metadata(&message).await?;

        internal!(level = DEBUG, "Queued message {id} in {}", self.path.display());
        Ok(id)
    }

    async fn fetch_eligible(
        &self,
        domain: Option<&str>,
        cooldown_cutoff: u64,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueuedMessage>> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut found = Vec::new();

        for id in self.ids().await? {
            if found.len() >= limit {
                break;
            }

            if let Some(message) = self.read_listed(&id).await?
                && message.in_domain(domain)
                && message.is_eligible(cooldown_cutoff)
            {
                found.push(self.read_data(message).await?);
            }
        }

        Ok(found)
    }

    async fn record_attempt(&self, id: &MessageId, attempted_at: u64) -> crate::Result<()> {
        let mut message = self.read_metadata(id).await?;
        message.last_attempt = attempted_at;
        self.write_metadata(&message).await
    }

    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        match fs::remove_file(self.meta_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueueError::NotFound(*id));
            }
            Err(e) => return Err(e.into()),
        }

        // Without its metadata the data file is already invisible
        if let Err(e) = fs::remove_file(self.data_path(id)).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }

        internal!(level = DEBUG, "Deleted message {id}");
        Ok(())
    }

    async fn expire_older_than(
        &self,
        cutoff: u64,
        require_attempted: bool,
    ) -> crate::Result<usize> {
        let mut removed = 0;

        for id in self.ids().await? {
            if self
                .read_listed(&id)
                .await?
                .is_some_and(|message| message.is_expired(cutoff, require_attempted))
            {
                self.delete(&id).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn list(&self) -> crate::Result<Vec<QueuedMessage>> {
        let mut messages = Vec::new();
        for id in self.ids().await? {
            if let Some(message) = self.read_listed(&id).await? {
                messages.push(self.read_data(message).await?);
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    async fn store() -> (TempDir, FileMessageStore) {
        let dir = TempDir::new().unwrap();
        let store = FileMessageStore::new(dir.path().join("queue")).unwrap();
        store.init().await.unwrap();
        (dir, store)
    }

    fn message(created_at: u64, last_attempt: u64) -> QueuedMessage {
        QueuedMessage {
            id: MessageId::new(ulid::Ulid::from_parts(created_at, u128::from(last_attempt))),
            last_attempt,
            ..QueuedMessage::new(
                "sender@example.com",
                vec!["a@example.net".to_string(), "b@example.net".to_string()],
                b"Subject: hi\r\n\r\nbody\r\n".as_slice(),
                created_at,
            )
        }
    }

    #[tokio::test]
    async fn test_insert_then_list() {
        let (_dir, store) = store().await;
        let original = message(100, 0).with_domain("vf");
        let id = store.insert(original.clone()).await.unwrap();

        assert!(store.path().join(format!("{id}.eml")).exists());
        assert!(store.path().join(format!("{id}.bin")).exists());

        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![original]);
    }

    #[tokio::test]
    async fn test_record_attempt_persists() {
        let (_dir, store) = store().await;
        let id = store.insert(message(100, 0)).await.unwrap();

        store.record_attempt(&id, 4_242).await.unwrap();

        let reopened = FileMessageStore::new(store.path()).unwrap();
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed[0].last_attempt, 4_242);
    }

    #[tokio::test]
    async fn test_fetch_eligible_in_creation_order() {
        let (_dir, store) = store().await;
        let second = store.insert(message(2, 0)).await.unwrap();
        let first = store.insert(message(1, 0)).await.unwrap();
        store.insert(message(3, 950)).await.unwrap();

        let ids: Vec<_> = store
            .fetch_eligible(None, 700, None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first, second]);

        assert_eq!(store.fetch_eligible(None, 700, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_both_files() {
        let (_dir, store) = store().await;
        let id = store.insert(message(1, 0)).await.unwrap();

        store.delete(&id).await.unwrap();

        assert!(!store.path().join(format!("{id}.eml")).exists());
        assert!(!store.path().join(format!("{id}.bin")).exists());
        assert!(matches!(
            store.delete(&id).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expire_older_than() {
        let (_dir, store) = store().await;
        let untouched = store.insert(message(1, 0)).await.unwrap();
        store.insert(message(2, 10)).await.unwrap();

        assert_eq!(store.expire_older_than(100, true).await.unwrap(), 1);

        let remaining: Vec<_> = store.list().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(remaining, vec![untouched]);
    }

    #[tokio::test]
    async fn test_foreign_and_temp_files_are_ignored() {
        let (_dir, store) = store().await;
        store.insert(message(1, 0)).await.unwrap();
        std::fs::write(store.path().join("README"), b"not a message").unwrap();
        std::fs::write(store.path().join(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin"), b"junk").unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);

        store.init().await.unwrap();
        assert!(!store.path().join(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").exists());
        assert!(store.path().join("README").exists());
    }

    #[tokio::test]
    async fn test_undecodable_record_does_not_block_the_queue() {
        let (_dir, store) = store().await;
        let healthy = [
            store.insert(message(1, 0)).await.unwrap(),
            store.insert(message(2, 0)).await.unwrap(),
            store.insert(message(3, 0)).await.unwrap(),
        ];

        let broken = MessageId::new(ulid::Ulid::from_parts(4, 0));
        std::fs::write(store.path().join(format!("{broken}.bin")), b"\xff\xffnot bincode").unwrap();
        std::fs::write(store.path().join(format!("{broken}.eml")), b"body").unwrap();

        let ids: Vec<_> = store
            .fetch_eligible(None, 0, None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, healthy.to_vec());

        assert!(!store.path().join(format!("{broken}.bin")).exists());
        assert!(store.path().join(format!("{broken}.bin.corrupt")).exists());

        assert_eq!(store.expire_older_than(100, false).await.unwrap(), 3);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_expire_skip_undecodable_records() {
        let (_dir, store) = store().await;
        let kept = store.insert(message(1, 0)).await.unwrap();

        let broken = MessageId::new(ulid::Ulid::from_parts(2, 0));
        std::fs::write(store.path().join(format!("{broken}.bin")), b"\xff").unwrap();

        assert_eq!(store.expire_older_than(100, true).await.unwrap(), 0);
        let listed: Vec<_> = store.list().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(listed, vec![kept]);
    }

    #[test]
    fn test_path_validation() {
        assert!(FileMessageStore::new("relative/queue").is_err());
        assert!(FileMessageStore::new("/var/spool/../etc").is_err());
        assert!(FileMessageStore::new("/etc/postq").is_err());
        assert!(FileMessageStore::new("/var/spool/postq").is_ok());
    }
}
