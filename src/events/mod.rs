//! Event bus for in-process lifecycle notifications
//!
//! Events are published after the corresponding storage write has committed,
//! so an observer that sees an event can read the new state back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{JobStatus, JobType};

const EVENT_CAPACITY: usize = 1024;

/// Event types that can be published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job was submitted and persisted as pending
    JobCreated {
        job_id: Uuid,
        project_id: Uuid,
        job_type: JobType,
        timestamp: DateTime<Utc>,
    },

    /// Job status changed
    JobStatusChanged {
        job_id: Uuid,
        project_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// Version was recorded, manually or by a job
    VersionCreated {
        version_id: Uuid,
        project_id: Uuid,
        label: String,
        job_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Project stable pointer moved (markStable or rollback)
    StablePointerMoved {
        project_id: Uuid,
        version_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Project was archived
    ProjectArchived {
        project_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the job ID associated with this event (if applicable)
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Event::JobCreated { job_id, .. } => Some(*job_id),
            Event::JobStatusChanged { job_id, .. } => Some(*job_id),
            Event::VersionCreated { job_id, .. } => *job_id,
            _ => None,
        }
    }

    /// Get the project ID associated with this event
    pub fn project_id(&self) -> Uuid {
        match self {
            Event::JobCreated { project_id, .. }
            | Event::JobStatusChanged { project_id, .. }
            | Event::VersionCreated { project_id, .. }
            | Event::StablePointerMoved { project_id, .. }
            | Event::ProjectArchived { project_id, .. } => *project_id,
        }
    }

    /// Terminal status reached by a job, if this event records one
    pub fn terminal_status(&self) -> Option<JobStatus> {
        match self {
            Event::JobStatusChanged { to, .. } if to.is_terminal() => Some(*to),
            _ => None,
        }
    }
}

/// Event bus for pub/sub communication
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        // Ignore errors if there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn job_status_changed(&self, job_id: Uuid, project_id: Uuid, from: JobStatus, to: JobStatus) {
        self.publish(Event::JobStatusChanged {
            job_id,
            project_id,
            from,
            to,
            timestamp: Utc::now(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
