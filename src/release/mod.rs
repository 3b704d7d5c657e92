pub mod client;
pub mod models;

pub use client::{ReleaseClient, ReleaseError};
pub use models::{ReleaseConfig, ReleaseInfo};
