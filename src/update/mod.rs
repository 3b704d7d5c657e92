use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::domain::VersionTag;
use crate::release::{ReleaseClient, ReleaseError};

/// Result of one update check + (possibly) replacement.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Local and remote tags match; zero writes performed.
    UpToDate(VersionTag),
    /// Binary replaced with the given remote tag.
    Updated(VersionTag),
    /// Remote version could not be determined; binary left untouched.
    CheckFailed,
    /// Download or swap failed; the prior binary is intact if the failure
    /// came before the remove step, absent if it came after.
    UpdateFailed(String),
}

/// Verdict of one version comparison, before any download happens.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCheck {
    UpToDate(VersionTag),
    /// Local tag (if any) differs from the published one; an unknown local
    /// version never equals a concrete remote tag.
    Stale {
        local: Option<VersionTag>,
        remote: VersionTag,
    },
    CheckFailed,
}

/// Keeps the managed binary current against the release feed.
///
/// An update check never aborts a fetch job: every failure mode degrades to
/// an outcome the orchestrator narrates and then proceeds past.
#[derive(Clone)]
pub struct BinaryUpdater {
    client: ReleaseClient,
}

impl BinaryUpdater {
    pub fn new(client: ReleaseClient) -> Self {
        Self { client }
    }

    /// Compare the binary at `path` against the release feed without
    /// touching the disk.
    pub async fn check(&self, path: &Path) -> UpdateCheck {
        let local = self.client.local_version(path).await;

        let remote = match self.client.remote_version().await {
            Ok(tag) => tag,
            Err(e) => {
                log::warn!("Release feed check failed: {}", e);
                return UpdateCheck::CheckFailed;
            }
        };

        if local.as_ref() == Some(&remote) {
            UpdateCheck::UpToDate(remote)
        } else {
            UpdateCheck::Stale { local, remote }
        }
    }

    /// Check and, if stale, replace in one call.
    pub async fn ensure_up_to_date(&self, path: &Path) -> UpdateOutcome {
        match self.check(path).await {
            UpdateCheck::UpToDate(tag) => UpdateOutcome::UpToDate(tag),
            UpdateCheck::CheckFailed => UpdateOutcome::CheckFailed,
            UpdateCheck::Stale { local, remote } => {
                log::info!(
                    "Updating managed binary {} -> {}",
                    local.map(|t| t.0).unwrap_or_else(|| "unknown".to_string()),
                    remote
                );
                match self.install(path).await {
                    Ok(()) => UpdateOutcome::Updated(remote),
                    Err(e) => UpdateOutcome::UpdateFailed(e.to_string()),
                }
            }
        }
    }

    /// Stream the new binary to `<path>.new`, then swap it into place.
    ///
    /// The canonical path never holds a partial file: the temp file is fully
    /// written and synced before the old binary is removed. Rename is the
    /// only step assumed atomic; a crash between remove and rename leaves no
    /// binary at `path` until the next update run. A failure before the
    /// remove leaves the old binary intact.
    pub async fn install(&self, path: &Path) -> Result<(), ReleaseError> {
        let temp_path = temp_sibling(path);

        let (total_size, stream) = self.client.download_binary_stream().await?;
        let mut stream = stream.boxed();
        log::debug!(
            "Downloading binary to {} ({} bytes)",
            temp_path.display(),
            total_size.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
        );

        let mut file = tokio::fs::File::create(&temp_path).await?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }

        file.sync_all().await?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }

        tokio::fs::rename(&temp_path, path).await?;

        Ok(())
    }
}

/// `path` + ".new", preserving any existing extension.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".new");
    PathBuf::from(name)
}
