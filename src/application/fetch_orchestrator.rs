use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{
    domain::{CancellationToken, FetchRequest, JobState},
    process::RunningProcess,
    progress::ProgressParser,
    release::ReleaseClient,
    update::{BinaryUpdater, UpdateCheck},
};

/// Callbacks through which a job narrates itself to the presentation layer.
///
/// The core never touches presentation state; thread-affinity of these
/// callbacks is the caller's responsibility.
pub trait JobSink: Send + Sync {
    /// Raw output line or orchestration notice, in arrival order.
    fn on_log(&self, line: &str);
    /// A parsed progress line.
    fn on_progress(&self, event: &crate::domain::ProgressEvent);
    /// Human-readable phase change.
    fn on_status(&self, text: &str);
}

/// Runs one fetch job end to end: version reconciliation, process spawn,
/// line-by-line progress streaming and cooperative cancellation.
///
/// At most one job may run at a time per orchestrator; starting a second
/// while one is active is a caller error.
#[derive(Clone)]
pub struct FetchOrchestrator {
    updater: BinaryUpdater,
    parser: ProgressParser,
    state: Arc<Mutex<JobState>>,
}

impl FetchOrchestrator {
    pub fn new(client: ReleaseClient) -> Self {
        Self {
            updater: BinaryUpdater::new(client),
            parser: ProgressParser::new(),
            state: Arc::new(Mutex::new(JobState::Idle)),
        }
    }

    /// Current phase of the job; `Idle` before the first run, the terminal
    /// state of the last run afterwards.
    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: JobState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Drive `request` to a terminal state.
    ///
    /// Update problems degrade to log lines and the job proceeds with
    /// whatever binary is on disk; only a failed spawn (or an unusable
    /// output directory) is fatal. Stream end is the completion signal;
    /// the child's exit code is logged but deliberately not inspected.
    pub async fn run(
        &self,
        request: FetchRequest,
        token: CancellationToken,
        sink: &dyn JobSink,
    ) -> JobState {
        if let Err(e) = tokio::fs::create_dir_all(&request.output_dir).await {
            sink.on_log(&format!("Cannot create output directory: {}", e));
            return self.finish(JobState::Failed, sink);
        }

        self.check_for_update(&request.binary_path, sink).await;

        let argv = build_argv(&request);
        log::debug!("Spawning {} {:?}", request.binary_path.display(), argv);

        sink.on_status("Downloading...");
        let mut process = match RunningProcess::start(&request.binary_path, &argv) {
            Ok(p) => p,
            Err(e) => {
                log::error!("{}", e);
                sink.on_log(&e.to_string());
                return self.finish(JobState::Failed, sink);
            }
        };
        self.set_state(JobState::Running);

        // Cancellation is checked once per line, and `canceled()` wakes the
        // loop even while the child is silent mid-transfer.
        loop {
            let line = tokio::select! {
                line = process.next_line() => line,
                _ = token.canceled() => None,
            };
            let Some(line) = line else { break };
            if token.is_canceled() {
                break;
            }
            sink.on_log(&line);
            if let Some(event) = self.parser.parse_line(&line) {
                sink.on_progress(&event);
            }
        }

        if token.is_canceled() {
            self.set_state(JobState::Canceling);
            sink.on_status("Canceling...");
            process.cancel();
        }

        // Exactly one wait per start, on every path past a successful spawn.
        match process.wait().await {
            Ok(status) => log::debug!("Downloader exited with {}", status),
            Err(e) => log::warn!("Failed to reap downloader: {}", e),
        }

        if token.is_canceled() {
            sink.on_log("Download canceled by user.");
            self.finish(JobState::Canceled, sink)
        } else {
            self.finish(JobState::Completed, sink)
        }
    }

    /// Record the terminal state and narrate it.
    fn finish(&self, state: JobState, sink: &dyn JobSink) -> JobState {
        self.set_state(state);
        sink.on_status(match state {
            JobState::Completed => "Download complete.",
            JobState::Canceled => "Download canceled.",
            _ => "Download failed.",
        });
        state
    }

    /// Pre-flight update check. Never aborts the job, only delays it.
    async fn check_for_update(&self, binary_path: &Path, sink: &dyn JobSink) {
        self.set_state(JobState::CheckingVersion);
        sink.on_status("Checking downloader version...");
        sink.on_log("Checking downloader version...");

        match self.updater.check(binary_path).await {
            UpdateCheck::UpToDate(tag) => {
                sink.on_log(&format!("Downloader up to date ({})", tag));
            }
            UpdateCheck::CheckFailed => {
                sink.on_log("Could not check latest downloader version.");
            }
            UpdateCheck::Stale { local, remote } => {
                self.set_state(JobState::Updating);
                sink.on_status("Updating downloader...");
                sink.on_log(&format!(
                    "Updating downloader {} -> {}",
                    local.map(|t| t.0).unwrap_or_else(|| "unknown".to_string()),
                    remote
                ));
                match self.updater.install(binary_path).await {
                    Ok(()) => sink.on_log(&format!("Downloader updated to {}", remote)),
                    Err(e) => sink.on_log(&format!("Update failed: {}", e)),
                }
            }
        }
    }
}

/// Deterministic argv for one request. Exactly one of the audio or video
/// flag groups is present, never both.
fn build_argv(request: &FetchRequest) -> Vec<String> {
    let mut argv = vec![
        request.url.clone(),
        "-P".to_string(),
        request.output_dir.display().to_string(),
        "--ffmpeg-location".to_string(),
        request.aux_tool_path.display().to_string(),
        "--newline".to_string(),
        "--no-keep-video".to_string(),
    ];

    if request.audio_only {
        argv.extend(
            ["-f", "bestaudio", "--extract-audio", "--audio-format", "mp3", "--audio-quality", "192K"]
                .map(String::from),
        );
    } else {
        argv.extend(
            [
                "-f",
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]",
                "--merge-output-format",
                "mp4",
            ]
            .map(String::from),
        );
    }

    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProgressEvent;
    use crate::release::{ReleaseClient, ReleaseConfig};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        logs: Mutex<Vec<String>>,
        progress: Mutex<Vec<ProgressEvent>>,
        statuses: Mutex<Vec<String>>,
    }

    impl JobSink for RecordingSink {
        fn on_log(&self, line: &str) {
            self.logs.lock().unwrap().push(line.to_string());
        }
        fn on_progress(&self, event: &ProgressEvent) {
            self.progress.lock().unwrap().push(event.clone());
        }
        fn on_status(&self, text: &str) {
            self.statuses.lock().unwrap().push(text.to_string());
        }
    }

    fn request(binary: PathBuf, audio_only: bool) -> FetchRequest {
        FetchRequest {
            url: "https://youtu.be/abc123".to_string(),
            audio_only,
            output_dir: std::env::temp_dir().join("ytfetch-orchestrator-test"),
            binary_path: binary,
            aux_tool_path: PathBuf::from("/usr/bin/ffmpeg"),
        }
    }

    /// Orchestrator whose release feed points nowhere reachable, so every
    /// update check degrades to CheckFailed.
    fn offline_orchestrator() -> FetchOrchestrator {
        let _ = env_logger::builder().is_test(true).try_init();
        FetchOrchestrator::new(ReleaseClient::new(ReleaseConfig {
            metadata_url: "http://127.0.0.1:9/releases/latest".to_string(),
            binary_url: "http://127.0.0.1:9/download".to_string(),
            timeout: Duration::from_millis(200),
        }))
    }

    #[test]
    fn test_state_starts_idle() {
        assert_eq!(offline_orchestrator().state(), JobState::Idle);
    }

    #[test]
    fn test_audio_argv_has_audio_flags_only() {
        let argv = build_argv(&request(PathBuf::from("/opt/yt-dlp"), true));
        assert!(argv.contains(&"--extract-audio".to_string()));
        assert!(argv.contains(&"bestaudio".to_string()));
        assert!(!argv.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_video_argv_has_video_flags_only() {
        let argv = build_argv(&request(PathBuf::from("/opt/yt-dlp"), false));
        assert!(argv.contains(&"--merge-output-format".to_string()));
        assert!(argv.contains(&"bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]".to_string()));
        assert!(!argv.contains(&"--extract-audio".to_string()));
    }

    #[test]
    fn test_argv_always_starts_with_url_and_base_flags() {
        for audio_only in [true, false] {
            let argv = build_argv(&request(PathBuf::from("/opt/yt-dlp"), audio_only));
            assert_eq!(argv[0], "https://youtu.be/abc123");
            assert!(argv.contains(&"--newline".to_string()));
            assert!(argv.contains(&"--ffmpeg-location".to_string()));
            assert!(argv.contains(&"--no-keep-video".to_string()));
        }
    }

    #[tokio::test]
    async fn test_missing_binary_fails_before_running() {
        let orchestrator = offline_orchestrator();
        let sink = RecordingSink::default();
        let state = orchestrator
            .run(
                request(PathBuf::from("/nonexistent/ytfetch-test/yt-dlp"), false),
                CancellationToken::new(),
                &sink,
            )
            .await;

        assert_eq!(state, JobState::Failed);
        assert_eq!(orchestrator.state(), JobState::Failed);
        assert!(sink.progress.lock().unwrap().is_empty());
        let statuses = sink.statuses.lock().unwrap();
        assert_eq!(statuses.last().unwrap(), "Download failed.");
    }

    #[cfg(unix)]
    fn fake_binary(script: &str, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = std::env::temp_dir().join(format!("ytfetch-fake-{}-{}", name, std::process::id()));
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_lines_reach_the_sink() {
        let binary = fake_binary(
            "#!/bin/sh\n\
             echo '[download] Destination: clip.mp4'\n\
             echo '[download]  45.2% of 10.00MiB ETA 00:12'\n\
             echo 'Merging formats into clip.mp4'\n",
            "progress",
        );

        let orchestrator = offline_orchestrator();
        let sink = RecordingSink::default();
        let state = orchestrator
            .run(request(binary.clone(), false), CancellationToken::new(), &sink)
            .await;

        assert_eq!(state, JobState::Completed);
        assert_eq!(orchestrator.state(), JobState::Completed);
        let progress = sink.progress.lock().unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].percent, 45.2);
        assert_eq!(progress[0].eta, "00:12");

        let logs = sink.logs.lock().unwrap();
        assert!(logs.iter().any(|l| l.contains("Merging formats")));
        let _ = std::fs::remove_file(&binary);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preset_cancellation_skips_progress() {
        let binary = fake_binary(
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then echo 1.0; exit 0; fi\n\
             echo '[download]  45.2% of 10.00MiB ETA 00:12'\n\
             sleep 30\n",
            "cancel",
        );

        let token = CancellationToken::new();
        token.cancel();

        let orchestrator = offline_orchestrator();
        let sink = RecordingSink::default();
        let state = orchestrator
            .run(request(binary.clone(), true), token, &sink)
            .await;

        assert_eq!(state, JobState::Canceled);
        assert!(sink.progress.lock().unwrap().is_empty());
        let statuses = sink.statuses.lock().unwrap();
        assert_eq!(statuses.last().unwrap(), "Download canceled.");
        let _ = std::fs::remove_file(&binary);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_mid_run_wakes_silent_child_read() {
        // A stalled transfer emits nothing; cancel must still interrupt the
        // read loop instead of waiting for the next line.
        let binary = fake_binary(
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then echo 1.0; exit 0; fi\n\
             sleep 30\n",
            "silent",
        );

        let orchestrator = offline_orchestrator();
        let sink = Arc::new(RecordingSink::default());
        let token = CancellationToken::new();

        let job = {
            let orchestrator = orchestrator.clone();
            let sink = sink.clone();
            let token = token.clone();
            let request = request(binary.clone(), false);
            tokio::spawn(async move { orchestrator.run(request, token, &*sink).await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();

        let state = tokio::time::timeout(Duration::from_secs(5), job)
            .await
            .expect("run() did not notice cancellation while the child was silent")
            .unwrap();

        assert_eq!(state, JobState::Canceled);
        assert_eq!(orchestrator.state(), JobState::Canceled);
        assert!(sink.progress.lock().unwrap().is_empty());
        let _ = std::fs::remove_file(&binary);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_still_completes() {
        // Exit-code inspection is a deliberate extension point; stream end
        // counts as completion today.
        let binary = fake_binary("#!/bin/sh\necho 'ERROR: no formats'\nexit 1\n", "exitcode");

        let orchestrator = offline_orchestrator();
        let sink = RecordingSink::default();
        let state = orchestrator
            .run(request(binary.clone(), false), CancellationToken::new(), &sink)
            .await;

        assert_eq!(state, JobState::Completed);
        let _ = std::fs::remove_file(&binary);
    }
}
