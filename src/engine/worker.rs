//! Worker pool - N workers draining the job queue plus a pending-job sweep

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::domain::JobStatus;
use crate::services::JobRegistry;

use super::{EngineSettings, JobExecutor};

/// Running worker tasks; dropping this does not stop them, call `shutdown`
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn the workers and the sweep task
    pub fn spawn(
        executor: Arc<JobExecutor>,
        registry: JobRegistry,
        receiver: mpsc::Receiver<Uuid>,
        settings: &EngineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(settings.workers + 1);

        for worker_id in 0..settings.workers {
            let executor = Arc::clone(&executor);
            let receiver = Arc::clone(&receiver);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_worker(worker_id, executor, receiver, shutdown).await;
            }));
        }

        let sweep_interval = settings.sweep_interval;
        let sweep_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_sweep(registry, sweep_interval, sweep_shutdown).await;
        }));

        tracing::info!(
            workers = settings.workers,
            sweep_interval_ms = settings.sweep_interval.as_millis() as u64,
            "Job engine started"
        );

        Self { handles, shutdown }
    }

    /// Stop taking new jobs and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Engine task panicked");
            }
        }
        tracing::info!("Job engine stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    executor: Arc<JobExecutor>,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    shutdown: CancellationToken,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                job_id = receiver.recv() => job_id,
            }
        };

        let Some(job_id) = next else {
            break;
        };

        tracing::debug!(worker_id, job_id = %job_id, "Worker picked up job");
        // Own task per job so a panic fails the job instead of killing the worker
        let task = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.run(job_id).await })
        };
        if let Err(e) = task.await {
            tracing::error!(worker_id, job_id = %job_id, error = %e, "Job execution panicked");
            executor.abandon(job_id, "Job execution panicked").await;
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}

/// Periodically re-offer pending jobs whose notification was dropped
async fn run_sweep(registry: JobRegistry, interval: std::time::Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; recovery already enqueued everything
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match db::list_job_ids_by_status(registry.pool(), JobStatus::Pending).await {
                    Ok(ids) => {
                        for job_id in ids {
                            if !registry.active().is_active(&job_id) {
                                registry.queue().notify(job_id);
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Pending job sweep failed"),
                }
            }
        }
    }
}
