//! End-to-end job scenarios through the worker pool

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use foundry::domain::{
    CreateJobRequest, JobFilter, JobStatus, JobType, LogLevel, NewVersion, OrchestratorError,
};

use crate::common::{fast_settings, observe_statuses, wait_running, TestEnv};

#[tokio::test]
async fn test_patch_job_produces_stable_version() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("shop").await;
    let mut events = orch.events.subscribe();

    let mut req = CreateJobRequest::new(project.id, "patch", "fix the cart total");
    req.mark_stable = true;
    let job = orch.jobs.create(req).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let observed = observe_statuses(&mut events, job.id).await;
    assert_eq!(
        observed,
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Success]
    );
    assert!(orch.jobs.machine().is_valid_path(&observed));

    let finished = orch.jobs.get(&job.id).await.unwrap();
    assert_eq!(finished.job.status, JobStatus::Success);
    assert!(finished.job.started_at.is_some());
    assert!(finished.job.completed_at.is_some());
    assert_eq!(finished.job.metadata["backend"], "scripted");
    assert_eq!(finished.job.metadata["versionLabel"], "v1");

    let messages: Vec<&str> = finished.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["Job queued", "Job started", "Job succeeded"]);

    let versions = orch.versions.list(&project.id).await.unwrap();
    assert_eq!(versions.len(), 1);
    let version = &versions[0];
    assert_eq!(version.label, "v1");
    assert_eq!(version.job_id, Some(job.id));
    assert!(version.is_stable);
    assert_eq!(version.parent_version_id, None);
    assert_eq!(
        finished.job.metadata["versionId"],
        serde_json::json!(version.id)
    );

    let files = orch.versions.get(&version.id).await.unwrap().files;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].content, "fix the cart total");

    let details = orch.projects.get(&project.id).await.unwrap();
    assert_eq!(details.project.stable_version_id, Some(version.id));
    assert_eq!(details.job_counts.success, 1);

    env.stop().await;
}

#[tokio::test]
async fn test_job_builds_on_stable_version() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("blog").await;

    let v1 = orch
        .versions
        .create(NewVersion::for_project(project.id))
        .await
        .unwrap();
    orch.versions.mark_stable(&v1.id).await.unwrap();

    let job = env.submit(project.id, "refactor", "split the layout").await;
    assert_eq!(job.base_version_id, Some(v1.id));
    let job = env.wait_terminal(job.id).await;
    assert_eq!(job.status, JobStatus::Success);

    let produced = &orch.versions.list(&project.id).await.unwrap()[0];
    assert_eq!(produced.label, "v2");
    assert_eq!(produced.parent_version_id, Some(v1.id));
    // Not marked stable, so the pointer stays put
    assert!(!produced.is_stable);
    let details = orch.projects.get(&project.id).await.unwrap();
    assert_eq!(details.project.stable_version_id, Some(v1.id));

    env.stop().await;
}

#[tokio::test]
async fn test_review_job_records_no_version() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("docs").await;

    let job = env.submit(project.id, "review", "look over the nav").await;
    let job = env.wait_terminal(job.id).await;

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.metadata["summary"], "handled review");
    assert!(job.metadata.get("versionId").is_none());
    assert!(orch.versions.list(&project.id).await.unwrap().is_empty());

    env.stop().await;
}

#[tokio::test]
async fn test_backend_failure_fails_job() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("api").await;
    let v1 = orch
        .versions
        .create(NewVersion::for_project(project.id))
        .await
        .unwrap();
    orch.versions.mark_stable(&v1.id).await.unwrap();
    let mut events = orch.events.subscribe();

    let job = env.submit(project.id, "generate", "fail:model overloaded").await;
    let observed = observe_statuses(&mut events, job.id).await;
    assert_eq!(observed.last(), Some(&JobStatus::Failed));
    assert!(orch.jobs.machine().is_valid_path(&observed));

    let failed = orch.jobs.get(&job.id).await.unwrap();
    assert_eq!(failed.job.failure_code(), Some("BACKEND_ERROR"));
    assert!(failed.job.metadata["error"]
        .as_str()
        .unwrap()
        .contains("model overloaded"));
    let last = failed.logs.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert!(last.message.starts_with("Job failed"));

    // No version and the stable pointer is untouched
    let versions = orch.versions.list(&project.id).await.unwrap();
    assert_eq!(versions.len(), 1);
    let details = orch.projects.get(&project.id).await.unwrap();
    assert_eq!(details.project.stable_version_id, Some(v1.id));

    env.stop().await;
}

#[tokio::test]
async fn test_backend_timeout_fails_job() {
    let mut settings = fast_settings();
    settings.backend_timeout = Duration::from_millis(200);
    let env = TestEnv::start_with(settings).await;
    let project = env.project("slowpoke").await;

    let job = env.submit(project.id, "patch", "hang forever").await;
    let job = env.wait_terminal(job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_code(), Some("BACKEND_TIMEOUT"));
    assert!(env
        .orchestrator
        .versions
        .list(&project.id)
        .await
        .unwrap()
        .is_empty());

    env.stop().await;
}

#[tokio::test]
async fn test_cancel_running_job_discards_result() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("race").await;
    let mut events = orch.events.subscribe();

    let job = env.submit(project.id, "patch", "hang until cancelled").await;
    wait_running(&mut events, job.id).await;

    let cancelled = assert_ok!(orch.jobs.cancel(&job.id).await);
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // Give the worker time to notice and wind down
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = orch.jobs.get(&job.id).await.unwrap();
    assert_eq!(after.job.status, JobStatus::Cancelled);
    assert!(orch.versions.list(&project.id).await.unwrap().is_empty());
    assert!(after
        .logs
        .iter()
        .any(|l| l.level == LogLevel::Warn && l.message == "Job cancelled"));
    assert!(!orch.jobs.active().is_active(&job.id));

    // A terminal job cannot be cancelled again
    let err = assert_err!(orch.jobs.cancel(&job.id).await);
    assert!(matches!(err, OrchestratorError::Conflict(_)));

    env.stop().await;
}

#[tokio::test]
async fn test_cancel_races_with_completion() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("coinflip").await;

    // Whichever side wins, the job ends in exactly one terminal status and a
    // version exists only when it succeeded.
    for _ in 0..5 {
        let job = env.submit(project.id, "patch", "slow:20 tweak").await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        let _ = orch.jobs.cancel(&job.id).await;

        let job = env.wait_terminal(job.id).await;
        let produced = orch
            .versions
            .list(&project.id)
            .await
            .unwrap()
            .into_iter()
            .any(|v| v.job_id == Some(job.id));
        match job.status {
            JobStatus::Success => assert!(produced),
            JobStatus::Cancelled => assert!(!produced),
            other => panic!("unexpected status {}", other),
        }
    }

    env.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_job_never_runs() {
    let mut env = TestEnv::idle().await;
    let project = env.project("queued").await;

    let job = env.submit(project.id, "patch", "never runs").await;
    env.orchestrator.jobs.cancel(&job.id).await.unwrap();

    env.start_engine().await;
    // Several sweep intervals
    tokio::time::sleep(Duration::from_millis(250)).await;

    let job = env.orchestrator.jobs.get(&job.id).await.unwrap().job;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.started_at.is_none());
    assert_eq!(env.backend.calls(), 0);

    env.stop().await;
}

#[tokio::test]
async fn test_archived_project_rejects_jobs() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("retired").await;
    let version = orch
        .versions
        .create(NewVersion::for_project(project.id))
        .await
        .unwrap();

    orch.projects.archive(&project.id).await.unwrap();

    let err = assert_err!(
        orch.jobs
            .create(CreateJobRequest::new(project.id, "patch", "too late"))
            .await
    );
    assert!(matches!(err, OrchestratorError::Conflict(_)));

    // History stays readable
    assert_eq!(orch.versions.get(&version.id).await.unwrap().version.label, "v1");

    env.stop().await;
}

#[tokio::test]
async fn test_job_validation() {
    let env = TestEnv::idle().await;
    let orch = &env.orchestrator;
    let project = env.project("strict").await;
    let other = env.project("other").await;
    let foreign = orch
        .versions
        .create(NewVersion::for_project(other.id))
        .await
        .unwrap();

    let err = assert_err!(
        orch.jobs
            .create(CreateJobRequest::new(project.id, "deploy", "ship it"))
            .await
    );
    assert!(matches!(err, OrchestratorError::InvalidArgument(_)));

    let err = assert_err!(
        orch.jobs
            .create(CreateJobRequest::new(project.id, "patch", "   "))
            .await
    );
    assert!(matches!(err, OrchestratorError::InvalidArgument(_)));

    let err = assert_err!(
        orch.jobs
            .create(CreateJobRequest::new(uuid::Uuid::new_v4(), "patch", "x"))
            .await
    );
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let mut req = CreateJobRequest::new(project.id, "patch", "x");
    req.base_version_id = Some(foreign.id);
    let err = assert_err!(orch.jobs.create(req).await);
    assert!(matches!(err, OrchestratorError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_many_jobs_all_finish() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("busy").await;

    let mut ids = Vec::new();
    for i in 0..8 {
        let job_type = if i % 2 == 0 { "generate" } else { "debug" };
        ids.push(env.submit(project.id, job_type, &format!("slow:5 task {}", i)).await.id);
    }
    for id in &ids {
        assert_eq!(env.wait_terminal(*id).await.status, JobStatus::Success);
    }

    // Four generate jobs, four versions with distinct labels
    let mut labels: Vec<String> = orch
        .versions
        .list(&project.id)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.label)
        .collect();
    labels.sort();
    assert_eq!(labels, vec!["v1", "v2", "v3", "v4"]);

    let filter = JobFilter {
        job_type: Some(JobType::Debug),
        ..JobFilter::for_project(project.id)
    };
    let (debug_jobs, total) = orch.jobs.list(&filter).await.unwrap();
    assert_eq!(total, 4);
    assert!(debug_jobs.iter().all(|j| j.job_type == JobType::Debug));

    env.stop().await;
}

#[tokio::test]
async fn test_base_version_deleted_while_running() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("moving-target").await;
    let base = orch
        .versions
        .create(NewVersion::for_project(project.id))
        .await
        .unwrap();
    let mut events = orch.events.subscribe();

    let mut req = CreateJobRequest::new(project.id, "patch", "slow:300 rework the base");
    req.base_version_id = Some(base.id);
    let job = orch.jobs.create(req).await.unwrap();
    wait_running(&mut events, job.id).await;

    orch.versions.delete(&base.id).await.unwrap();

    let job = env.wait_terminal(job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_code(), Some("VERSION_REJECTED"));
    assert!(orch.versions.list(&project.id).await.unwrap().is_empty());

    env.stop().await;
}

#[tokio::test]
async fn test_storage_failure_during_finalize() {
    let mut settings = fast_settings();
    settings.storage_retry_deadline = Duration::from_millis(300);
    let env = TestEnv::start_with(settings).await;
    let orch = &env.orchestrator;
    let project = env.project("brittle").await;
    let mut events = orch.events.subscribe();

    let job = env.submit(project.id, "generate", "slow:200 scaffold").await;
    wait_running(&mut events, job.id).await;

    // Every attempt to write the version's files now fails
    sqlx::query("DROP TABLE version_files")
        .execute(&orch.pool)
        .await
        .unwrap();

    let job = env.wait_terminal(job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_code(), Some("STORAGE_FAILURE"));
    assert!(job.metadata["error"]
        .as_str()
        .unwrap()
        .contains("version_files"));
    // The failed success transaction left nothing behind
    assert!(orch.versions.list(&project.id).await.unwrap().is_empty());
    assert!(job.metadata.get("versionId").is_none());

    let logs = orch.jobs.get(&job.id).await.unwrap().logs;
    assert_eq!(logs.last().unwrap().level, LogLevel::Error);

    env.stop().await;
}

#[tokio::test]
async fn test_exhausted_label_sequence_rejects_job_version() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("maxed-out").await;
    orch.versions
        .create(NewVersion::for_project(project.id).with_label(format!("v{}", u64::MAX)))
        .await
        .unwrap();

    let job = env.submit(project.id, "patch", "one more").await;
    let job = env.wait_terminal(job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_code(), Some("VERSION_REJECTED"));
    assert_eq!(orch.versions.list(&project.id).await.unwrap().len(), 1);

    // The engine keeps serving the project
    let review = env.submit(project.id, "review", "still alive").await;
    assert_eq!(env.wait_terminal(review.id).await.status, JobStatus::Success);

    env.stop().await;
}

#[tokio::test]
async fn test_panicking_execution_fails_job_and_keeps_workers() {
    let env = TestEnv::start().await;
    let orch = &env.orchestrator;
    let project = env.project("crashy").await;

    // More panics than workers
    let mut crashed = Vec::new();
    for _ in 0..fast_settings().workers + 1 {
        crashed.push(env.submit(project.id, "patch", "panic now").await.id);
    }
    for id in &crashed {
        let job = env.wait_terminal(*id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_code(), Some("INTERRUPTED"));
        assert!(!orch.jobs.active().is_active(id));
    }

    let job = env.submit(project.id, "patch", "calm down").await;
    let job = env.wait_terminal(job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(orch.versions.list(&project.id).await.unwrap()[0].label, "v1");

    env.stop().await;
}
