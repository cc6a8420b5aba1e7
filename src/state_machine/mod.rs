//! Job State Machine - the lifecycle a job moves through

mod machine;
mod transitions;

pub use machine::*;
pub use transitions::*;
