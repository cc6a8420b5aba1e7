//! Wiring for the orchestrator: services, engine and the shared event bus

use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::TaskBackend;
use crate::domain::{OrchestratorError, OrchestratorResult};
use crate::engine::{recover_jobs, ActiveJobs, EngineSettings, JobExecutor, JobQueue, WorkerPool};
use crate::events::EventBus;
use crate::services::{JobRegistry, LogSink, ProjectManager, VersionStore};

/// All orchestrator components sharing one pool and one event bus
pub struct Orchestrator {
    pub pool: SqlitePool,
    pub events: EventBus,
    pub projects: ProjectManager,
    pub versions: VersionStore,
    pub jobs: JobRegistry,
    pub logs: LogSink,
    executor: Arc<JobExecutor>,
    receiver: Mutex<Option<mpsc::Receiver<Uuid>>>,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(pool: SqlitePool, backend: Arc<dyn TaskBackend>, settings: EngineSettings) -> Self {
        let events = EventBus::new();
        let logs = LogSink::new(pool.clone());
        let versions = VersionStore::new(pool.clone(), events.clone());
        let projects = ProjectManager::new(pool.clone(), versions.clone(), events.clone());

        let (queue, receiver) = JobQueue::channel(settings.queue_capacity);
        let jobs = JobRegistry::new(
            pool.clone(),
            logs.clone(),
            events.clone(),
            queue,
            ActiveJobs::new(),
        );
        let executor = Arc::new(JobExecutor::new(
            jobs.clone(),
            versions.clone(),
            backend,
            settings.clone(),
        ));

        Self {
            pool,
            events,
            projects,
            versions,
            jobs,
            logs,
            executor,
            receiver: Mutex::new(Some(receiver)),
            settings,
        }
    }

    /// Recover jobs from a previous run and start the worker pool
    ///
    /// Can be called once; the queue has a single consumer.
    pub async fn start(&self, shutdown: CancellationToken) -> OrchestratorResult<WorkerPool> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| OrchestratorError::conflict("Job engine already started"))?;

        if let Err(e) = recover_jobs(&self.jobs).await {
            *self.receiver.lock().unwrap_or_else(|e| e.into_inner()) = Some(receiver);
            return Err(e);
        }

        Ok(WorkerPool::spawn(
            Arc::clone(&self.executor),
            self.jobs.clone(),
            receiver,
            &self.settings,
            shutdown,
        ))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
