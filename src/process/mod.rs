use std::path::Path;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },
}

/// A spawned fetch process with its output captured as one line stream.
///
/// stdout and stderr are merged: the managed binary interleaves progress
/// lines and diagnostics across both, and the caller wants them in arrival
/// order. The stream is forward-only and consumed exactly once per job.
///
/// Every `start` must be paired with exactly one `wait`, on every exit path,
/// or the child is left as a zombie.
pub struct RunningProcess {
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
}

impl RunningProcess {
    /// Spawn `binary` with `args`, line-buffered output piped back.
    ///
    /// A missing or non-executable binary surfaces here; the caller must not
    /// read or wait on a process that failed to start.
    pub fn start(binary: &Path, args: &[String]) -> Result<RunningProcess, SpawnError> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpawnError::Spawn {
                binary: binary.display().to_string(),
                source: e,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        forward_lines(child.stdout.take(), tx.clone());
        forward_lines(child.stderr.take(), tx);

        Ok(RunningProcess { child, lines: rx })
    }

    /// Next output line, or `None` once the child has closed both pipes.
    /// A read error on either pipe is treated as end of that stream.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Signal the child to terminate without waiting for it. Idempotent: on
    /// an already-exited process this is a no-op.
    pub fn cancel(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("Terminate signal not delivered (process already gone): {}", e);
        }
    }

    /// Reap the child. Must be called exactly once after line consumption
    /// ends, including on the cancellation path.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }
}

/// Pump one pipe into the shared line channel on a background task.
fn forward_lines<R>(pipe: Option<R>, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else { return };
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                // EOF and read errors both end the stream
                Ok(None) | Err(_) => break,
            }
        }
    });
}
