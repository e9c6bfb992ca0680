//! `postq --mailq`: a sendmail-style listing of the queue.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use postq_queue::{MessageStore, QueueConfig, QueuedMessage};

const HEADER: &str = "---------Queue ID--------- --Size-- ----Arrival Time---- -Sender/Recipient-------";

fn timestamp(secs: u64, format: &str) -> Option<String> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.format(format).to_string())
}

/// Render `messages` the way `mailq` prints them
#[must_use]
pub fn render(messages: &[QueuedMessage]) -> String {
    if messages.is_empty() {
        return "Mail queue is empty\n".to_string();
    }

    let mut out = String::new();
    let mut total_size = 0;

    let _ = writeln!(out, "{HEADER}");
    for message in messages {
        total_size += message.size();

        let arrival = message
            .created_at
            .and_then(|created| timestamp(created, "%a %b %d %H:%M:%S"))
            .unwrap_or_else(|| "Unknown".to_string());

        let _ = writeln!(
            out,
            "{} {:>8} {arrival:>20}  {}",
            message.id,
            message.size(),
            message.from
        );

        if message.attempted()
            && let Some(attempt) = timestamp(message.last_attempt, "%Y-%m-%d %H:%M:%S UTC")
        {
            let _ = writeln!(out, "Last send attempt: {attempt}");
        }

        let _ = writeln!(out, "{:57}{}", "", message.to.join(", "));
        let _ = writeln!(out);
    }

    let _ = writeln!(
        out,
        "-- {} Kbytes in {} Requests.",
        total_size / 1024,
        messages.len()
    );
    out
}

/// List the queue described by `queue`
///
/// The queue is only read: a missing directory is an empty queue, and a
/// running daemon's partially written files are left alone.
///
/// # Errors
/// If the queue cannot be opened or read
pub async fn list(queue: QueueConfig) -> anyhow::Result<String> {
    if let Some(path) = queue.path()
        && !tokio::fs::try_exists(path).await?
    {
        return Ok(render(&[]));
    }

    let store = queue.open_read_only()?;
    Ok(render(&store.list().await?))
}

#[cfg(test)]
mod tests {
    use postq_queue::{FileMessageStore, MessageId};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn message(size: usize, created_at: Option<u64>, last_attempt: u64) -> QueuedMessage {
        QueuedMessage {
            id: "01HF8Z3KQ4W5XJ8M2N6P7R9T0V".parse::<MessageId>().unwrap(),
            created_at,
            last_attempt,
            ..QueuedMessage::new(
                "sender@example.com",
                vec!["a@example.net".to_string(), "b@example.net".to_string()],
                vec![b'x'; size],
                0,
            )
        }
    }

    #[test]
    fn test_empty_queue() {
        assert_eq!(render(&[]), "Mail queue is empty\n");
    }

    #[test]
    fn test_listing() {
        let listing = render(&[
            message(2_048, Some(1_700_000_000), 0),
            message(1_024, None, 1_700_000_300),
        ]);
        let lines: Vec<_> = listing.lines().collect();

        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            "01HF8Z3KQ4W5XJ8M2N6P7R9T0V     2048  Tue Nov 14 22:13:20  sender@example.com"
        );
        assert_eq!(lines[2].trim_start(), "a@example.net, b@example.net");
        assert_eq!(lines[3], "");
        assert_eq!(
            lines[4],
            "01HF8Z3KQ4W5XJ8M2N6P7R9T0V     1024              Unknown  sender@example.com"
        );
        assert_eq!(lines[5], "Last send attempt: 2023-11-14 22:18:20 UTC");
        assert_eq!(lines.last(), Some(&"-- 3 Kbytes in 2 Requests."));
    }

    #[tokio::test]
    async fn test_missing_queue_directory_lists_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue");

        let listing = list(QueueConfig::File { path: path.clone() }).await.unwrap();
        assert_eq!(listing, "Mail queue is empty\n");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_listing_leaves_in_flight_files_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue");
        let daemon_store = FileMessageStore::new(&path).unwrap();
        daemon_store.init().await.unwrap();
        daemon_store.insert(message(10, Some(1_700_000_000), 0)).await.unwrap();

        let in_flight = path.join(".tmp_01HF8Z3KQ4W5XJ8M2N6P7R9T0W.bin");
        std::fs::write(&in_flight, b"half written").unwrap();

        let listing = list(QueueConfig::File { path }).await.unwrap();
        assert!(listing.ends_with("-- 0 Kbytes in 1 Requests.\n"));
        assert!(in_flight.exists());
    }
}
