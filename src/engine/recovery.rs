//! Startup recovery for jobs left behind by a previous process

use uuid::Uuid;

use crate::db;
use crate::domain::{FailureCode, JobStatus, OrchestratorResult};
use crate::services::JobRegistry;
use crate::state_machine::Trigger;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs that were running with no live owner and are now failed
    pub interrupted: Vec<Uuid>,
    /// Pending jobs offered to the queue again
    pub requeued: Vec<Uuid>,
}

/// Fail orphaned running jobs and re-enqueue pending ones
///
/// Must run before any worker starts; at that point no job can legitimately
/// be running.
pub async fn recover_jobs(registry: &JobRegistry) -> OrchestratorResult<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for job_id in db::list_job_ids_by_status(registry.pool(), JobStatus::Running).await? {
        let Some(job) = db::get_job(registry.pool(), &job_id).await? else {
            continue;
        };
        let failed = registry
            .fail(
                &job,
                Trigger::Abandon,
                FailureCode::Interrupted.as_str(),
                "Job was running when the engine stopped",
            )
            .await?;
        if failed {
            report.interrupted.push(job_id);
        }
    }

    for job_id in db::list_job_ids_by_status(registry.pool(), JobStatus::Pending).await? {
        registry.queue().notify(job_id);
        report.requeued.push(job_id);
    }

    if !report.interrupted.is_empty() || !report.requeued.is_empty() {
        tracing::info!(
            interrupted = report.interrupted.len(),
            requeued = report.requeued.len(),
            "Recovered jobs from previous run"
        );
    }

    Ok(report)
}
