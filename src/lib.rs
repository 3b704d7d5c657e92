//! Supervision layer for an external, self-updating media-fetch binary.
//!
//! Keeps the managed binary current against its release feed, spawns it for
//! one fetch job at a time, streams its progress output back to a
//! caller-supplied sink and supports cooperative cancellation mid-transfer.
//! The binary itself is opaque; its contract is its command line and the
//! shape of its progress lines.

pub mod application;
pub mod domain;
pub mod process;
pub mod progress;
pub mod release;
pub mod update;

pub use application::{FetchOrchestrator, JobSink};
pub use domain::{CancellationToken, FetchRequest, JobState, ProgressEvent, VersionTag};
pub use process::{RunningProcess, SpawnError};
pub use progress::ProgressParser;
pub use release::{ReleaseClient, ReleaseConfig};
pub use update::{BinaryUpdater, UpdateCheck, UpdateOutcome};
