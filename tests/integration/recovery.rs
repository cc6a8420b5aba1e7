//! Restart behaviour: orphaned and queued jobs from a previous process

use foundry::domain::{JobStatus, LogLevel, OrchestratorError};

use crate::common::TestEnv;

#[tokio::test]
async fn test_restart_fails_orphans_and_runs_pending() {
    let env = TestEnv::idle().await;
    let project = env.project("phoenix").await;

    // A job a crashed worker had claimed, and one that never got picked up
    let orphan = env.submit(project.id, "patch", "was in flight").await;
    let claimed = env.orchestrator.jobs.claim(&orphan.id).await.unwrap();
    assert_eq!(claimed.unwrap().status, JobStatus::Running);
    let waiting = env.submit(project.id, "generate", "still queued").await;

    let mut env = env.reopen().await;
    env.start_engine().await;

    let orphan = env.wait_terminal(orphan.id).await;
    assert_eq!(orphan.status, JobStatus::Failed);
    assert_eq!(orphan.failure_code(), Some("INTERRUPTED"));
    let logs = env.orchestrator.jobs.get(&orphan.id).await.unwrap().logs;
    assert_eq!(logs.last().unwrap().level, LogLevel::Error);

    let waiting = env.wait_terminal(waiting.id).await;
    assert_eq!(waiting.status, JobStatus::Success);
    assert_eq!(env.backend.calls(), 1);

    let versions = env.orchestrator.versions.list(&project.id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].job_id, Some(waiting.id));

    env.stop().await;
}

#[tokio::test]
async fn test_engine_starts_once() {
    let mut env = TestEnv::idle().await;
    env.start_engine().await;

    let shutdown = tokio_util::sync::CancellationToken::new();
    match env.orchestrator.start(shutdown).await {
        Err(OrchestratorError::Conflict(_)) => {}
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("second start should be rejected"),
    }

    env.stop().await;
}
