pub mod fetch_orchestrator;

pub use fetch_orchestrator::{FetchOrchestrator, JobSink};
