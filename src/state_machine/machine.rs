//! Job state machine implementation

use std::collections::HashMap;

use thiserror::Error;

use crate::domain::JobStatus;
use crate::state_machine::transitions::{build_transitions, TransitionDef, Trigger};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} with trigger {trigger}")]
    InvalidTransition { from: JobStatus, trigger: Trigger },

    #[error("Job is in terminal status {0}")]
    Terminal(JobStatus),
}

/// The job state machine validates every status change
pub struct JobStateMachine {
    transitions: HashMap<(JobStatus, Trigger), TransitionDef>,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        for def in build_transitions() {
            transitions.insert((def.from, def.trigger), def);
        }

        Self { transitions }
    }

    /// Resolve the target status for a trigger, or explain why it is illegal
    pub fn transition(&self, current: JobStatus, trigger: Trigger) -> Result<JobStatus, TransitionError> {
        if current.is_terminal() {
            return Err(TransitionError::Terminal(current));
        }

        self.transitions
            .get(&(current, trigger))
            .map(|def| def.to)
            .ok_or(TransitionError::InvalidTransition {
                from: current,
                trigger,
            })
    }

    /// Whether `from → to` is a single legal step under any trigger
    pub fn is_legal_step(&self, from: JobStatus, to: JobStatus) -> bool {
        self.transitions
            .values()
            .any(|def| def.from == from && def.to == to)
    }

    /// Whether a sequence of observed statuses is a legal path from `pending`
    ///
    /// Repeated observations of the same status are allowed.
    pub fn is_valid_path(&self, observed: &[JobStatus]) -> bool {
        let mut iter = observed.iter().copied();
        let Some(first) = iter.next() else {
            return true;
        };
        if first != JobStatus::Pending {
            return false;
        }

        let mut current = first;
        for next in iter {
            if next == current {
                continue;
            }
            if !self.is_legal_step(current, next) {
                return false;
            }
            current = next;
        }
        true
    }
}
