//! Orchestrator services: projects, versions, jobs and logs
//!
//! Each service owns a clone of the pool and publishes lifecycle events on
//! the shared bus after its writes commit.

mod jobs;
mod logs;
mod projects;
mod versions;

pub use jobs::JobRegistry;
pub use logs::LogSink;
pub use projects::ProjectManager;
pub use versions::{LabelGuard, VersionStore};
