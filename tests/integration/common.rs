//! Shared fixtures: scripted backend, temporary databases, event observers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use foundry::backend::{BackendError, TaskBackend, TaskOutcome, TaskRequest};
use foundry::db::init_database;
use foundry::domain::{
    CreateJobRequest, CreateProjectRequest, Job, JobStatus, Project, VersionFile,
};
use foundry::engine::{EngineSettings, WorkerPool};
use foundry::events::Event;
use foundry::Orchestrator;

pub const WAIT: Duration = Duration::from_secs(10);

/// Backend whose behaviour is chosen by the prompt prefix
///
/// - `fail:<msg>` returns an API error
/// - `hang` never returns
/// - `panic` panics inside the execution task
/// - `slow:<ms>` sleeps, then succeeds
/// - anything else succeeds with one artifact holding the prompt
#[derive(Default)]
pub struct ScriptedBackend {
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn success(request: &TaskRequest) -> TaskOutcome {
        TaskOutcome {
            artifacts: vec![VersionFile::new("src/main.rs", request.input_prompt.clone())],
            summary: format!("handled {}", request.job_type),
            backend_id: Some(format!("run-{}", request.job_id)),
        }
    }
}

#[async_trait]
impl TaskBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, request: &TaskRequest) -> Result<TaskOutcome, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.input_prompt.as_str();

        if let Some(message) = prompt.strip_prefix("fail:") {
            return Err(BackendError::Api {
                status: 500,
                message: message.to_string(),
            });
        }
        if prompt.starts_with("panic") {
            panic!("scripted backend panic");
        }
        if prompt.starts_with("hang") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(ms) = prompt.strip_prefix("slow:") {
            let ms: u64 = ms.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(50);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        Ok(Self::success(request))
    }
}

/// Engine settings tuned for quick tests
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        workers: 2,
        queue_capacity: 64,
        backend_timeout: Duration::from_secs(5),
        sweep_interval: Duration::from_millis(50),
        storage_retry_deadline: Duration::from_secs(2),
    }
}

/// An orchestrator on a temporary database, optionally with a running engine
pub struct TestEnv {
    pub orchestrator: Arc<Orchestrator>,
    pub backend: Arc<ScriptedBackend>,
    workers: Option<WorkerPool>,
    shutdown: CancellationToken,
    db_path: String,
    _dir: Arc<TempDir>,
}

impl TestEnv {
    /// Running engine with `fast_settings`
    pub async fn start() -> Self {
        Self::start_with(fast_settings()).await
    }

    pub async fn start_with(settings: EngineSettings) -> Self {
        let mut env = Self::idle_with(settings).await;
        env.start_engine().await;
        env
    }

    /// Orchestrator without workers; jobs stay pending until `start_engine`
    pub async fn idle() -> Self {
        Self::idle_with(fast_settings()).await
    }

    pub async fn idle_with(settings: EngineSettings) -> Self {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let db_path = dir.path().join("foundry.db").to_string_lossy().to_string();
        Self::open(dir, db_path, settings).await
    }

    /// A second orchestrator on the same database, as after a restart
    pub async fn reopen(self) -> Self {
        let dir = Arc::clone(&self._dir);
        let db_path = self.db_path.clone();
        let settings = self.orchestrator.settings().clone();
        self.stop().await;
        Self::open(dir, db_path, settings).await
    }

    async fn open(dir: Arc<TempDir>, db_path: String, settings: EngineSettings) -> Self {
        let pool = init_database(&db_path).await.unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let orchestrator = Arc::new(Orchestrator::new(
            pool,
            Arc::clone(&backend) as Arc<dyn TaskBackend>,
            settings,
        ));

        Self {
            orchestrator,
            backend,
            workers: None,
            shutdown: CancellationToken::new(),
            db_path,
            _dir: dir,
        }
    }

    pub async fn start_engine(&mut self) {
        let workers = self
            .orchestrator
            .start(self.shutdown.child_token())
            .await
            .unwrap();
        self.workers = Some(workers);
    }

    /// Stop the engine and close the pool
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
        self.orchestrator.pool.close().await;
    }

    pub async fn project(&self, name: &str) -> Project {
        self.orchestrator
            .projects
            .create(project_request(name))
            .await
            .unwrap()
    }

    pub async fn submit(&self, project_id: Uuid, job_type: &str, prompt: &str) -> Job {
        self.orchestrator
            .jobs
            .create(CreateJobRequest::new(project_id, job_type, prompt))
            .await
            .unwrap()
    }

    /// Poll until the job reaches a terminal status
    pub async fn wait_terminal(&self, job_id: Uuid) -> Job {
        tokio::time::timeout(WAIT, async {
            loop {
                let job = self.orchestrator.jobs.get(&job_id).await.unwrap().job;
                if job.status.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }
}

pub fn project_request(name: &str) -> CreateProjectRequest {
    CreateProjectRequest {
        name: name.to_string(),
        description: None,
        project_type: "static_site".to_string(),
        source_kind: "local".to_string(),
        source_location: Some(format!("/srv/{}", name)),
        source_branch: None,
    }
}

/// Statuses a job moves through as seen on the event bus, starting at pending
///
/// Subscribe before submitting the job, or the early events are missed.
pub async fn observe_statuses(events: &mut broadcast::Receiver<Event>, job_id: Uuid) -> Vec<JobStatus> {
    let mut observed = vec![JobStatus::Pending];
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event @ Event::JobStatusChanged { .. }) if event.job_id() == Some(job_id) => {
                    if let Event::JobStatusChanged { to, .. } = event {
                        observed.push(to);
                    }
                    if event.terminal_status().is_some() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await
    .expect("no terminal status event in time");
    observed
}

/// Wait for the event announcing that a job is running
pub async fn wait_running(events: &mut broadcast::Receiver<Event>, job_id: Uuid) {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(Event::JobStatusChanged {
                job_id: id,
                to: JobStatus::Running,
                ..
            }) = events.recv().await
            {
                if id == job_id {
                    return;
                }
            }
        }
    })
    .await
    .expect("job never started running");
}
