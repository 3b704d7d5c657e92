use std::path::Path;

use futures::Stream;
use futures::TryStreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::process::Command;

use crate::domain::VersionTag;

use super::models::{ReleaseConfig, ReleaseInfo};

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Version oracle for the managed binary: asks the release feed for the
/// latest published tag and probes the on-disk binary for its own version.
#[derive(Clone)]
pub struct ReleaseClient {
    config: ReleaseConfig,
    http: Client,
}

impl ReleaseClient {
    pub fn new(config: ReleaseConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    /// Latest published version tag from the release feed.
    ///
    /// Bounded by the configured timeout; any network error, non-2xx status
    /// or missing field surfaces as `Err` and is treated by callers as
    /// "remote version unknown".
    pub async fn remote_version(&self) -> Result<VersionTag> {
        let response = self
            .http
            .get(&self.config.metadata_url)
            .header("User-Agent", "ytfetch")
            .timeout(self.config.timeout)
            .send()
            .await?
            .error_for_status()?;

        let info: ReleaseInfo = response
            .json()
            .await
            .map_err(|e| ReleaseError::InvalidResponse(format!("JSON decode error: {}", e)))?;

        if info.tag_name.is_empty() {
            return Err(ReleaseError::InvalidResponse("empty tag_name".to_string()));
        }

        Ok(VersionTag(info.tag_name))
    }

    /// Version reported by the binary at `path`, by invoking it with
    /// `--version`. Absent binary, nonzero exit, I/O failure and empty
    /// output all collapse to `None`. An unknown local version is never
    /// fatal, it just forces an update.
    pub async fn local_version(&self, path: &Path) -> Option<VersionTag> {
        if !path.exists() {
            return None;
        }

        let output = Command::new(path).arg("--version").output().await.ok()?;
        if !output.status.success() {
            return None;
        }

        let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if tag.is_empty() {
            None
        } else {
            Some(VersionTag(tag))
        }
    }

    /// Open a byte stream over the latest release binary.
    /// Returns (total_size, stream); no timeout is applied to the transfer
    /// itself, only to the version check.
    pub async fn download_binary_stream(
        &self,
    ) -> Result<(Option<u64>, impl Stream<Item = Result<bytes::Bytes>>)> {
        let response = self
            .http
            .get(&self.config.binary_url)
            .header("User-Agent", "ytfetch")
            .send()
            .await?
            .error_for_status()?;

        let total_size = response.content_length();
        let stream = response.bytes_stream().map_err(ReleaseError::RequestError);

        Ok((total_size, stream))
    }
}
