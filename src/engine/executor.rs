//! Job executor - drives one claimed job to a terminal status
//!
//! The backend call is the only long suspension. Everything after it
//! (status change, version, stable pointer, terminal log) is written in a
//! single transaction guarded by a compare-and-set on `running`, so a job
//! cancelled while the backend was busy never produces a version.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{TaskBackend, TaskOutcome, TaskRequest};
use crate::db;
use crate::domain::{
    FailureCode, Job, JobStatus, LogEntry, NewVersion, OrchestratorError, OrchestratorResult,
    Version,
};
use crate::events::Event;
use crate::services::{JobRegistry, LabelGuard, LogSink, VersionStore};
use crate::state_machine::Trigger;

use super::{storage_backoff, EngineSettings};

const DESCRIPTION_PROMPT_CHARS: usize = 80;

/// How a single execution ended, from the worker's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The job was not pending any more; another worker or a cancel got it first
    Skipped,
    /// The job succeeded, producing a version for mutating job types
    Succeeded { version_id: Option<Uuid> },
    /// The job failed with a recorded code
    Failed(FailureCode),
    /// The job was cancelled while this worker held it
    Cancelled,
    /// No terminal status could be written before the storage deadline
    Unresolved,
}

/// Writes that landed in the success transaction, published after commit
struct Finalized {
    to: JobStatus,
    version: Option<Version>,
    entry: LogEntry,
}

/// Claims jobs and runs them against a task backend
pub struct JobExecutor {
    registry: JobRegistry,
    versions: VersionStore,
    backend: Arc<dyn TaskBackend>,
    settings: EngineSettings,
}

impl JobExecutor {
    pub fn new(
        registry: JobRegistry,
        versions: VersionStore,
        backend: Arc<dyn TaskBackend>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            versions,
            backend,
            settings,
        }
    }

    fn pool(&self) -> &SqlitePool {
        self.registry.pool()
    }

    /// Claim a job and run it to a terminal status
    pub async fn run(&self, job_id: Uuid) -> ExecutionOutcome {
        let job = match self.registry.claim(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(job_id = %job_id, "Job not claimable, skipping");
                return ExecutionOutcome::Skipped;
            }
            Err(e) => {
                // Still pending; the sweep offers it again
                tracing::warn!(job_id = %job_id, error = %e, "Failed to claim job");
                return ExecutionOutcome::Skipped;
            }
        };

        let active = self.registry.active();
        let token = active.register(job.id);
        let outcome = self.drive(&job, token).await;
        let held = active.unregister(&job.id).unwrap_or_default();

        tracing::info!(
            job_id = %job.id,
            project_id = %job.project_id,
            job_type = %job.job_type,
            outcome = ?outcome,
            held_ms = held.as_millis() as u64,
            "Job finished"
        );
        outcome
    }

    /// Fail a job whose execution task died before reaching a terminal status
    ///
    /// Leaves the job alone unless it is still `running`.
    pub async fn abandon(&self, job_id: Uuid, reason: &str) -> ExecutionOutcome {
        self.registry.active().unregister(&job_id);

        let job = match db::get_job(self.pool(), &job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Running => job,
            Ok(_) => return ExecutionOutcome::Skipped,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not load abandoned job; startup recovery will repair it");
                return ExecutionOutcome::Unresolved;
            }
        };

        let code = FailureCode::Interrupted;
        let result = self
            .with_storage_retry(job_id, "abandon", || {
                self.registry.fail(&job, Trigger::Abandon, code.as_str(), reason)
            })
            .await;

        match result {
            Ok(true) => ExecutionOutcome::Failed(code),
            Ok(false) => ExecutionOutcome::Skipped,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not fail abandoned job; startup recovery will repair it");
                ExecutionOutcome::Unresolved
            }
        }
    }

    async fn drive(&self, job: &Job, token: CancellationToken) -> ExecutionOutcome {
        // A cancel that landed between claim and register found no token to fire
        match db::get_job(self.pool(), &job.id).await {
            Ok(Some(current)) if current.status != JobStatus::Running => {
                return ExecutionOutcome::Cancelled;
            }
            Ok(None) => return ExecutionOutcome::Cancelled,
            _ => {}
        }

        let request = TaskRequest::from(job);
        let started = Instant::now();
        let result = tokio::select! {
            _ = token.cancelled() => {
                tracing::info!(job_id = %job.id, "Job cancelled during backend call");
                return ExecutionOutcome::Cancelled;
            }
            result = tokio::time::timeout(self.settings.backend_timeout, self.backend.execute(&request)) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Err(_) => {
                let message = format!(
                    "Backend timed out after {}s",
                    self.settings.backend_timeout.as_secs_f64()
                );
                self.fail(job, FailureCode::BackendTimeout, &message).await
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job.id, backend = self.backend.name(), error = %e, "Backend call failed");
                self.fail(job, FailureCode::BackendError, &e.to_string()).await
            }
            Ok(Ok(outcome)) => self.succeed(job, outcome, elapsed_ms).await,
        }
    }

    async fn succeed(&self, job: &Job, outcome: TaskOutcome, elapsed_ms: u64) -> ExecutionOutcome {
        // Lock before touching the pool; see VersionStore::lock_project
        let guard = if job.job_type.produces_version() {
            Some(self.versions.lock_project(job.project_id).await)
        } else {
            None
        };
        let guard_ref = guard.as_ref();

        let result = self
            .with_storage_retry(job.id, "finalize", || {
                self.finalize(job, &outcome, guard_ref, elapsed_ms)
            })
            .await;
        drop(guard);

        match result {
            Ok(Some(finalized)) => {
                LogSink::trace(&finalized.entry);
                let events = self.registry.events();
                events.job_status_changed(job.id, job.project_id, job.status, finalized.to);

                let version_id = finalized.version.as_ref().map(|v| v.id);
                if let Some(version) = &finalized.version {
                    self.versions.publish_created(version);
                    if job.mark_stable {
                        events.publish(Event::StablePointerMoved {
                            project_id: version.project_id,
                            version_id: version.id,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
                ExecutionOutcome::Succeeded { version_id }
            }
            Ok(None) => ExecutionOutcome::Cancelled,
            Err(OrchestratorError::InvalidArgument(message)) | Err(OrchestratorError::Conflict(message)) => {
                self.fail(job, FailureCode::VersionRejected, &message).await
            }
            Err(e) => self.fail(job, FailureCode::StorageFailure, &e.to_string()).await,
        }
    }

    /// Success transaction; `Ok(None)` means the job left `running` first
    async fn finalize(
        &self,
        job: &Job,
        outcome: &TaskOutcome,
        guard: Option<&LabelGuard>,
        elapsed_ms: u64,
    ) -> OrchestratorResult<Option<Finalized>> {
        let mut patch = serde_json::json!({
            "summary": outcome.summary,
            "backend": self.backend.name(),
            "durationMs": elapsed_ms,
        });
        if let Some(backend_id) = &outcome.backend_id {
            patch["backendId"] = serde_json::json!(backend_id);
        }

        let mut tx = self.pool().begin().await?;
        let Some(to) = self
            .registry
            .transition_in(&mut tx, job, Trigger::Succeed, Some(&patch))
            .await?
        else {
            return Ok(None);
        };

        let version = match guard {
            Some(guard) => {
                let prompt: String = job.input_prompt.chars().take(DESCRIPTION_PROMPT_CHARS).collect();
                let mut new = NewVersion::for_project(job.project_id)
                    .with_job(job.id)
                    .with_description(format!("{}: {}", job.job_type, prompt))
                    .with_files(outcome.artifacts.clone());
                if let Some(parent) = job.base_version_id {
                    new = new.with_parent(parent);
                }

                let mut version = self.versions.insert_locked(&mut tx, guard, new).await?;
                if job.mark_stable {
                    db::set_stable_version(&mut tx, &version.id).await?;
                    version.is_stable = true;
                }
                db::merge_job_metadata(
                    &mut tx,
                    &job.id,
                    &serde_json::json!({ "versionId": version.id, "versionLabel": version.label }),
                )
                .await?;
                Some(version)
            }
            None => None,
        };

        let mut entry = LogEntry::info(job.project_id, "Job succeeded").with_job(job.id);
        if let Some(version) = &version {
            entry = entry.with_metadata(serde_json::json!({
                "versionId": version.id,
                "label": version.label,
                "markedStable": job.mark_stable,
            }));
        }
        let entry = LogSink::append_in(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(Some(Finalized { to, version, entry }))
    }

    async fn fail(&self, job: &Job, code: FailureCode, message: &str) -> ExecutionOutcome {
        let result = self
            .with_storage_retry(job.id, "fail", || {
                self.registry.fail(job, Trigger::Fail, code.as_str(), message)
            })
            .await;

        match result {
            Ok(true) => ExecutionOutcome::Failed(code),
            // Lost the compare-and-set: the job was cancelled meanwhile
            Ok(false) => ExecutionOutcome::Cancelled,
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    code = %code,
                    error = %e,
                    "Could not record job failure; startup recovery will repair it"
                );
                ExecutionOutcome::Unresolved
            }
        }
    }

    /// Retry storage failures with exponential backoff until the deadline
    async fn with_storage_retry<T, F, Fut>(&self, job_id: Uuid, operation: &str, mut f: F) -> OrchestratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let deadline = Instant::now() + self.settings.storage_retry_deadline;
        let mut attempt = 0u32;

        loop {
            match f().await {
                Err(e) if e.is_storage() && Instant::now() < deadline => {
                    let delay = storage_backoff(attempt).min(deadline.saturating_duration_since(Instant::now()));
                    tracing::warn!(
                        job_id = %job_id,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Storage error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                other => return other,
            }
        }
    }
}
