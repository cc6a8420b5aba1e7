//! Job Registry - durable job records and their lifecycle

use std::sync::Arc;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::domain::{
    CreateJobRequest, Job, JobFilter, JobStatus, JobType, JobWithLogs, LogEntry, LogLevel,
    OrchestratorError, OrchestratorResult,
};
use crate::engine::{ActiveJobs, JobQueue};
use crate::events::{Event, EventBus};
use crate::state_machine::{JobStateMachine, TransitionError, Trigger};

use super::LogSink;

/// Durable record of submitted jobs
///
/// Every status change goes through the state machine and is then applied
/// with a compare-and-set on the current status, so two writers racing on
/// the same job cannot both win.
#[derive(Clone)]
pub struct JobRegistry {
    pool: SqlitePool,
    machine: Arc<JobStateMachine>,
    logs: LogSink,
    events: EventBus,
    queue: JobQueue,
    active: ActiveJobs,
}

impl JobRegistry {
    pub fn new(
        pool: SqlitePool,
        logs: LogSink,
        events: EventBus,
        queue: JobQueue,
        active: ActiveJobs,
    ) -> Self {
        Self {
            pool,
            machine: Arc::new(JobStateMachine::new()),
            logs,
            events,
            queue,
            active,
        }
    }

    /// Submit a job; it is persisted as pending and handed to the engine
    pub async fn create(&self, req: CreateJobRequest) -> OrchestratorResult<Job> {
        let job_type: JobType = req.job_type.parse().map_err(OrchestratorError::InvalidArgument)?;
        let input_prompt = req.input_prompt.trim();
        if input_prompt.is_empty() {
            return Err(OrchestratorError::invalid("inputPrompt must not be empty"));
        }

        let project = db::get_project(&self.pool, &req.project_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Project", req.project_id))?;
        if project.is_archived() {
            return Err(OrchestratorError::conflict(format!(
                "Project {} is archived",
                project.id
            )));
        }

        let base_version_id = match req.base_version_id {
            Some(version_id) => {
                let version = db::get_version(&self.pool, &version_id)
                    .await?
                    .ok_or_else(|| {
                        OrchestratorError::invalid(format!("Base version {} does not exist", version_id))
                    })?;
                if version.project_id != project.id {
                    return Err(OrchestratorError::invalid(format!(
                        "Base version {} belongs to another project",
                        version_id
                    )));
                }
                Some(version_id)
            }
            None => project.stable_version_id,
        };

        let mut job = Job::new(project.id, job_type, input_prompt.to_string());
        job.prompt_profile_id = req.prompt_profile_id;
        job.context_data = req.context_data;
        job.mark_stable = req.mark_stable;
        job.base_version_id = base_version_id;

        let mut tx = self.pool.begin().await?;
        db::insert_job(&mut tx, &job).await?;
        let entry = LogSink::append_in(
            &mut tx,
            LogEntry::new(job.project_id, LogLevel::Debug, "Job queued")
                .with_job(job.id)
                .with_metadata(serde_json::json!({ "type": job.job_type })),
        )
        .await?;
        tx.commit().await?;

        LogSink::trace(&entry);
        self.events.publish(Event::JobCreated {
            job_id: job.id,
            project_id: job.project_id,
            job_type: job.job_type,
            timestamp: Utc::now(),
        });
        self.queue.notify(job.id);

        Ok(job)
    }

    /// Job with its logs in emission order
    pub async fn get(&self, job_id: &Uuid) -> OrchestratorResult<JobWithLogs> {
        let job = self.find(job_id).await?;
        let logs = self.logs.for_job(job_id).await?;
        Ok(JobWithLogs { job, logs })
    }

    /// A page of jobs, newest first, with the total matching the filter
    pub async fn list(&self, filter: &JobFilter) -> OrchestratorResult<(Vec<Job>, i64)> {
        let jobs = db::list_jobs(&self.pool, filter).await?;
        let total = db::count_jobs(&self.pool, filter).await?;
        Ok((jobs, total))
    }

    /// Cancel a pending or running job
    ///
    /// The recorded status is authoritative; an in-flight backend call is
    /// signalled through its cancellation token and abandoned.
    pub async fn cancel(&self, job_id: &Uuid) -> OrchestratorResult<Job> {
        loop {
            let job = self.find(job_id).await?;
            if job.status.is_terminal() {
                return Err(OrchestratorError::conflict(format!(
                    "Job {} is already {}",
                    job_id, job.status
                )));
            }

            let mut tx = self.pool.begin().await?;
            let Some(to) = self.transition_in(&mut tx, &job, Trigger::Cancel, None).await? else {
                // Status moved under us; re-read and decide again
                continue;
            };
            let entry = LogSink::append_in(
                &mut tx,
                LogEntry::new(job.project_id, LogLevel::Warn, "Job cancelled")
                    .with_job(job.id)
                    .with_metadata(serde_json::json!({ "previousStatus": job.status })),
            )
            .await?;
            tx.commit().await?;

            self.active.cancel(job_id);
            LogSink::trace(&entry);
            self.events.job_status_changed(job.id, job.project_id, job.status, to);

            return self.find(job_id).await;
        }
    }

    /// Merge keys into a job's metadata; status is never touched
    pub async fn annotate(&self, job_id: &Uuid, patch: serde_json::Value) -> OrchestratorResult<Job> {
        if !patch.is_object() {
            return Err(OrchestratorError::invalid("Metadata patch must be a JSON object"));
        }

        let mut conn = self.pool.acquire().await?;
        if !db::merge_job_metadata(&mut conn, job_id, &patch).await? {
            return Err(OrchestratorError::not_found("Job", job_id));
        }
        drop(conn);

        self.find(job_id).await
    }

    /// Claim a pending job for execution
    ///
    /// Returns `None` when the job is gone or no longer pending, which means
    /// another worker owns it or it was cancelled first.
    pub async fn claim(&self, job_id: &Uuid) -> OrchestratorResult<Option<Job>> {
        let Some(job) = db::get_job(&self.pool, job_id).await? else {
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;
        let Some(to) = self.transition_in(&mut tx, &job, Trigger::Claim, None).await? else {
            return Ok(None);
        };
        let entry = LogSink::append_in(
            &mut tx,
            LogEntry::info(job.project_id, "Job started").with_job(job.id),
        )
        .await?;
        let claimed = db::get_job_on(&mut tx, job_id).await?;
        tx.commit().await?;

        LogSink::trace(&entry);
        self.events.job_status_changed(job.id, job.project_id, job.status, to);

        Ok(claimed)
    }

    /// Move a job to a failed status with an error log, in one transaction
    ///
    /// Returns false when the job had already left `job.status`.
    pub async fn fail(
        &self,
        job: &Job,
        trigger: Trigger,
        code: &str,
        message: &str,
    ) -> OrchestratorResult<bool> {
        let patch = serde_json::json!({ "errorCode": code, "error": message });

        let mut tx = self.pool.begin().await?;
        let Some(to) = self.transition_in(&mut tx, job, trigger, Some(&patch)).await? else {
            return Ok(false);
        };
        let entry = LogSink::append_in(
            &mut tx,
            LogEntry::new(job.project_id, LogLevel::Error, format!("Job failed: {}", message))
                .with_job(job.id)
                .with_metadata(serde_json::json!({ "errorCode": code })),
        )
        .await?;
        tx.commit().await?;

        LogSink::trace(&entry);
        self.events.job_status_changed(job.id, job.project_id, job.status, to);
        Ok(true)
    }

    /// Validate a trigger against the state machine and apply it as a
    /// compare-and-set from `job.status`
    ///
    /// Returns the new status, or `None` when the stored status no longer
    /// matches `job.status`. The caller owns the transaction and publishes
    /// the status change after commit.
    pub async fn transition_in(
        &self,
        conn: &mut SqliteConnection,
        job: &Job,
        trigger: Trigger,
        patch: Option<&serde_json::Value>,
    ) -> OrchestratorResult<Option<JobStatus>> {
        let to = self.machine.transition(job.status, trigger).map_err(|e| match e {
            TransitionError::Terminal(status) => {
                OrchestratorError::conflict(format!("Job {} is already {}", job.id, status))
            }
            other => OrchestratorError::conflict(other.to_string()),
        })?;

        let applied = db::transition_job(conn, &job.id, &[job.status], to, patch).await?;
        Ok(applied.then_some(to))
    }

    pub fn machine(&self) -> &JobStateMachine {
        &self.machine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn active(&self) -> &ActiveJobs {
        &self.active
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find(&self, job_id: &Uuid) -> OrchestratorResult<Job> {
        db::get_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Job", job_id))
    }
}
