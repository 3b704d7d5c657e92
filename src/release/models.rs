use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Response from the release metadata endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
}

/// Endpoints and limits for the release feed
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub metadata_url: String,
    pub binary_url: String,
    pub timeout: Duration,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            metadata_url: "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest".to_string(),
            binary_url: "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
                .to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}
