//! Send quota over a rolling period, persisted across restarts.
//!
//! The state file holds two integers, `period_start sent_count`, and is
//! rewritten whole on every update. A missing file just means no earlier run
//! has sent anything.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use postq_common::{Clock, internal, tracing};
use tokio::fs;

use crate::error::{DeliveryError, SystemError};

/// How much may be sent per period, and where the counter lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSettings {
    pub limit: usize,
    pub period_secs: u64,
    pub state_path: PathBuf,
}

/// The persisted counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    /// Epoch seconds at which the current period began
    pub period_start: u64,
    pub sent_count: usize,
}

impl QuotaState {
    #[must_use]
    pub const fn fresh(now: u64) -> Self {
        Self {
            period_start: now,
            sent_count: 0,
        }
    }
}

impl fmt::Display for QuotaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.period_start, self.sent_count)
    }
}

impl FromStr for QuotaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let (Some(start), Some(count), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(format!("expected two integers, found {s:?}"));
        };

        Ok(Self {
            period_start: start
                .parse()
                .map_err(|e| format!("bad period start {start:?}: {e}"))?,
            sent_count: count
                .parse()
                .map_err(|e| format!("bad sent count {count:?}: {e}"))?,
        })
    }
}

/// Tracks how much of the quota is left in the current period
///
/// Without settings every check passes and nothing is persisted.
#[derive(Debug)]
pub struct QuotaTracker {
    settings: Option<QuotaSettings>,
    state: QuotaState,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    #[must_use]
    pub fn new(settings: Option<QuotaSettings>, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            state: QuotaState::fresh(clock.now()),
            clock,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.settings.is_some()
    }

    #[must_use]
    pub const fn state(&self) -> QuotaState {
        self.state
    }

    /// When the current period ends, if a quota is configured
    #[must_use]
    pub fn period_end(&self) -> Option<u64> {
        self.settings
            .as_ref()
            .map(|s| self.state.period_start.saturating_add(s.period_secs))
    }

    /// Messages that may still be sent this period; `None` means unbounded
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        self.settings
            .as_ref()
            .map(|s| s.limit.saturating_sub(self.state.sent_count))
    }

    /// Whether the quota for the current period is used up
    ///
    /// Reloads the persisted counter first. Once the period has elapsed the
    /// counter starts over from now and the answer is `false`.
    ///
    /// # Errors
    /// If the state file exists but cannot be read
    pub async fn exceeded(&mut self) -> Result<bool, DeliveryError> {
        let Some(settings) = &self.settings else {
            return Ok(false);
        };

        if let Some(state) = load(&settings.state_path).await? {
            self.state = state;
        }

        let now = self.clock.now();
        if now < self.state.period_start.saturating_add(settings.period_secs) {
            Ok(self.remaining() == Some(0))
        } else {
            internal!(
                level = DEBUG,
                "Quota period started at {} has elapsed, resetting",
                self.state.period_start
            );
            self.state = QuotaState::fresh(now);
            Ok(false)
        }
    }

    /// Count `sent` more messages against this period and persist the counter
    ///
    /// # Errors
    /// If the state file cannot be written
    pub async fn record(&mut self, sent: usize) -> Result<(), DeliveryError> {
        let Some(settings) = &self.settings else {
            return Ok(());
        };

        self.state.sent_count = self.state.sent_count.saturating_add(sent);
        store(&settings.state_path, self.state).await
    }
}

fn state_error(path: &Path, source: std::io::Error) -> DeliveryError {
    SystemError::QuotaState {
        path: path.display().to_string(),
        source,
    }
    .into()
}

async fn load(path: &Path) -> Result<Option<QuotaState>, DeliveryError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(state_error(path, e)),
    };

    match contents.parse() {
        Ok(state) => Ok(Some(state)),
        Err(reason) => {
            tracing::warn!(path = %path.display(), "Ignoring unreadable quota state: {reason}");
            Ok(None)
        }
    }
}

async fn store(path: &Path, state: QuotaState) -> Result<(), DeliveryError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| state_error(path, e))?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");

    fs::write(&temp, state.to_string())
        .await
        .map_err(|e| state_error(path, e))?;
    fs::rename(&temp, path)
        .await
        .map_err(|e| state_error(path, e))
}

#[cfg(test)]
mod tests {
    use postq_common::MockClock;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn tracker(dir: &TempDir, clock: &MockClock, limit: usize, period_secs: u64) -> QuotaTracker {
        QuotaTracker::new(
            Some(QuotaSettings {
                limit,
                period_secs,
                state_path: dir.path().join("quota"),
            }),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_state_text_format() {
        let state = QuotaState {
            period_start: 123,
            sent_count: 2,
        };
        assert_eq!(state.to_string(), "123 2");
        assert_eq!("123 2".parse::<QuotaState>().unwrap(), state);
        assert_eq!(" 123\t2\n".parse::<QuotaState>().unwrap(), state);

        assert!("123".parse::<QuotaState>().is_err());
        assert!("123 2 7".parse::<QuotaState>().is_err());
        assert!("abc 2".parse::<QuotaState>().is_err());
        assert!("123 -1".parse::<QuotaState>().is_err());
    }

    #[tokio::test]
    async fn test_unlimited_never_exceeded() {
        let mut quota = QuotaTracker::new(None, Arc::new(MockClock::at(10)));
        assert!(!quota.exceeded().await.unwrap());
        assert_eq!(quota.remaining(), None);
        quota.record(1_000).await.unwrap();
        assert_eq!(quota.remaining(), None);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::at(123);

        let mut first = tracker(&dir, &clock, 5, 100);
        first.record(2).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("quota")).unwrap(),
            "123 2"
        );

        clock.set(150);
        let mut second = tracker(&dir, &clock, 5, 100);
        assert!(!second.exceeded().await.unwrap());
        assert_eq!(
            second.state(),
            QuotaState {
                period_start: 123,
                sent_count: 2
            }
        );
        assert_eq!(second.remaining(), Some(3));
    }

    #[tokio::test]
    async fn test_exhausted_until_period_ends() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::at(1_000);
        let mut quota = tracker(&dir, &clock, 2, 5);

        assert!(!quota.exceeded().await.unwrap());
        quota.record(3).await.unwrap();
        assert_eq!(quota.remaining(), Some(0));
        assert!(quota.exceeded().await.unwrap());

        clock.set(1_004);
        assert!(quota.exceeded().await.unwrap());
        assert_eq!(quota.period_end(), Some(1_005));

        clock.set(1_005);
        assert!(!quota.exceeded().await.unwrap());
        assert_eq!(quota.state(), QuotaState::fresh(1_005));
        assert_eq!(quota.remaining(), Some(2));
    }

    #[tokio::test]
    async fn test_missing_or_garbled_file_means_fresh_state() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::at(500);

        let mut quota = tracker(&dir, &clock, 1, 60);
        assert!(!quota.exceeded().await.unwrap());
        assert_eq!(quota.state(), QuotaState::fresh(500));

        std::fs::write(dir.path().join("quota"), "not a counter").unwrap();
        assert!(!quota.exceeded().await.unwrap());
        assert_eq!(quota.remaining(), Some(1));
    }

    #[tokio::test]
    async fn test_zero_quota_is_always_exceeded() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::at(10);
        let mut quota = tracker(&dir, &clock, 0, 60);

        assert!(quota.exceeded().await.unwrap());
        assert_eq!(quota.remaining(), Some(0));
    }

    #[tokio::test]
    async fn test_state_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::at(7);
        let mut quota = QuotaTracker::new(
            Some(QuotaSettings {
                limit: 3,
                period_secs: 60,
                state_path: dir.path().join("var").join("quota"),
            }),
            Arc::new(clock),
        );

        quota.record(1).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("var").join("quota")).unwrap(),
            "7 1"
        );
    }
}
