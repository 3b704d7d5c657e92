pub mod model;

pub use model::{CancellationToken, FetchRequest, JobState, ProgressEvent, VersionTag};
