//! Job Execution Engine - runs queued jobs against a task backend
//!
//! This module provides:
//! - `JobQueue`: bounded notification channel from the registry to the workers
//! - `ActiveJobs`: cancellation tokens for jobs currently owned by a worker
//! - `JobExecutor`: claims one job and drives it to a terminal status
//! - `WorkerPool`: the worker tasks plus the pending-job sweep
//! - `recover_jobs`: startup repair of jobs left behind by a previous process

pub mod executor;
pub mod recovery;
pub mod worker;

pub use executor::{ExecutionOutcome, JobExecutor};
pub use recovery::{recover_jobs, RecoveryReport};
pub use worker::WorkerPool;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;

/// Runtime settings for the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Number of concurrent workers
    pub workers: usize,
    /// Capacity of the notification queue
    pub queue_capacity: usize,
    /// Upper bound on a single backend call
    pub backend_timeout: Duration,
    /// How often pending jobs are re-enqueued
    pub sweep_interval: Duration,
    /// How long finalization keeps retrying storage errors
    pub storage_retry_deadline: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            backend_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(5),
            storage_retry_deadline: Duration::from_secs(30),
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            backend_timeout: Duration::from_secs(config.backend_timeout_secs),
            sweep_interval: Duration::from_millis(config.sweep_interval_ms.max(10)),
            storage_retry_deadline: Duration::from_secs(config.storage_retry_deadline_secs),
        }
    }
}

/// Sending half of the job notification queue
///
/// Notifications are hints: a full queue drops the id and the periodic sweep
/// picks the job up later, so submitters never block on the engine.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Uuid>,
}

impl JobQueue {
    /// Create a queue and its receiving half
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Notify the engine that a job is ready; returns false if the hint was dropped
    pub fn notify(&self, job_id: Uuid) -> bool {
        match self.sender.try_send(job_id) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(job_id = %job_id, "Job queue full, leaving job to the sweep");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(job_id = %job_id, "Job queue closed");
                false
            }
        }
    }
}

struct ActiveJob {
    token: CancellationToken,
    started: Instant,
}

/// Jobs currently owned by a worker, keyed by job ID
#[derive(Clone, Default)]
pub struct ActiveJobs {
    jobs: Arc<Mutex<HashMap<Uuid, ActiveJob>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a claimed job, returning its cancellation token
    pub fn register(&self, job_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(
            job_id,
            ActiveJob {
                token: token.clone(),
                started: Instant::now(),
            },
        );
        token
    }

    /// Forget a job, returning how long it was held
    pub fn unregister(&self, job_id: &Uuid) -> Option<Duration> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.remove(job_id).map(|job| job.started.elapsed())
    }

    /// Fire the cancellation token of an in-flight job; false if no worker holds it
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.get(job_id) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, job_id: &Uuid) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Delay before the next storage retry
///
/// Exponential from 50ms, doubling per attempt, capped at 2 seconds.
pub fn storage_backoff(attempt: u32) -> Duration {
    let base_ms = 50u64;
    let multiplier = 2u64.saturating_pow(attempt);
    let backoff = base_ms.saturating_mul(multiplier);

    let max_backoff_ms = 2_000u64;
    Duration::from_millis(backoff.min(max_backoff_ms))
}
