//! Transition definitions for the job state machine

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::JobStatus;

/// Triggers that move a job between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Trigger {
    /// A worker took exclusive ownership
    Claim,
    /// The backend call succeeded and results were recorded
    Succeed,
    /// The backend errored, timed out, or results could not be recorded
    Fail,
    /// Caller asked for cancellation
    Cancel,
    /// Startup recovery found a job with no live owner
    Abandon,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Claim => write!(f, "Claim"),
            Trigger::Succeed => write!(f, "Succeed"),
            Trigger::Fail => write!(f, "Fail"),
            Trigger::Cancel => write!(f, "Cancel"),
            Trigger::Abandon => write!(f, "Abandon"),
        }
    }
}

/// Definition of a status transition
#[derive(Debug, Clone, Copy)]
pub struct TransitionDef {
    pub from: JobStatus,
    pub to: JobStatus,
    pub trigger: Trigger,
}

impl TransitionDef {
    pub fn new(from: JobStatus, trigger: Trigger, to: JobStatus) -> Self {
        Self { from, to, trigger }
    }
}

/// Build all transition definitions
///
/// Terminal statuses have no outgoing transitions.
pub fn build_transitions() -> Vec<TransitionDef> {
    use JobStatus::*;
    use Trigger::*;

    vec![
        TransitionDef::new(Pending, Claim, Running),
        TransitionDef::new(Pending, Cancel, Cancelled),
        TransitionDef::new(Running, Succeed, Success),
        TransitionDef::new(Running, Fail, Failed),
        TransitionDef::new(Running, Cancel, Cancelled),
        TransitionDef::new(Running, Abandon, Failed),
    ]
}
