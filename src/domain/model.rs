use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

/// Release tag of the managed binary. Equality-only: any mismatch between
/// local and remote means an update is available, no ordering is assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag(pub String);

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fetch job. Immutable once constructed; `url` is validated by the caller.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub audio_only: bool,
    pub output_dir: PathBuf,
    pub binary_path: PathBuf,
    pub aux_tool_path: PathBuf,
}

/// Structured progress extracted from one matching output line.
///
/// `total_size` and `eta` are the raw tokens from the line, forwarded verbatim
/// for display; they are never parsed numerically.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub percent: f32,
    pub total_size: String,
    pub eta: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    CheckingVersion,
    Updating,
    Running,
    Canceling,
    Completed,
    Canceled,
    Failed,
}

/// Flip-once cancellation signal shared between the caller's cancel action and
/// the running job. Created per job, discarded at job end.
///
/// Backed by a watch channel rather than a bare atomic so that a job blocked
/// on subprocess output can be woken the moment `cancel` is called, not only
/// when the next line happens to arrive.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    signal: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self {
            signal: Arc::new(watch::Sender::new(false)),
        }
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once the token is canceled; immediately if it already was.
    pub async fn canceled(&self) {
        let mut rx = self.signal.subscribe();
        // wait_for checks the current value before suspending, so a cancel
        // that raced the subscription is not missed
        let _ = rx.wait_for(|canceled| *canceled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_flips_once() {
        let token = CancellationToken::new();
        assert!(!token.is_canceled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_canceled());

        // Canceling again is a no-op
        token.cancel();
        assert!(token.is_canceled());
    }

    #[tokio::test]
    async fn test_canceled_future_wakes_waiting_task() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.canceled().await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("canceled() did not resolve after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_canceled_resolves_immediately_when_already_set() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(100), token.canceled())
            .await
            .expect("canceled() should resolve at once on a set token");
    }

    #[test]
    fn test_version_tag_equality() {
        assert_eq!(VersionTag("2026.08.01".into()), VersionTag("2026.08.01".into()));
        assert_ne!(VersionTag("2026.08.01".into()), VersionTag("2026.07.15".into()));
    }
}
