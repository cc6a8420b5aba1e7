//! Domain models for Foundry

mod error;
mod job;
mod log;
mod project;
mod version;

pub use error::*;
pub use job::*;
pub use log::*;
pub use project::*;
pub use version::*;
