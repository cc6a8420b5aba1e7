//! HTTP surface: routing, envelopes and error status mapping

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use foundry::api::{build_router, AppState};

use crate::common::TestEnv;

fn router(env: &TestEnv) -> Router {
    build_router(AppState::new(Arc::clone(&env.orchestrator)), true)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_project(app: &Router, name: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/projects",
        Some(json!({ "name": name, "projectType": "dashboard", "sourceKind": "local" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn create_version(app: &Router, project_id: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/versions",
        Some(json!({ "projectId": project_id, "files": [{ "path": "a.txt", "content": "blob:a" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let env = TestEnv::idle().await;
    let app = router(&env);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_project_routes() {
    let env = TestEnv::idle().await;
    let app = router(&env);

    let id = create_project(&app, "console").await;

    let (status, body) = send(&app, "GET", &format!("/api/projects/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "console");
    assert_eq!(body["data"]["projectType"], "dashboard");
    assert_eq!(body["data"]["versionCount"], 0);
    assert_eq!(body["data"]["jobCounts"]["pending"], 0);
    assert!(body["meta"]["timestamp"].is_string());

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/projects/{}", id),
        Some(json!({ "description": "ops console" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["description"], "ops console");
    assert_eq!(body["data"]["name"], "console");

    let (status, body) = send(&app, "DELETE", &format!("/api/projects/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "archived");

    let (status, body) = send(&app, "GET", "/api/projects?status=archived", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (_, body) = send(&app, "GET", "/api/projects?status=active", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_input_is_bad_request() {
    let env = TestEnv::idle().await;
    let app = router(&env);

    let (status, body) = send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "name": "x", "projectType": "mainframe", "sourceKind": "local" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

    // Missing required field
    let (status, body) = send(&app, "POST", "/api/projects", Some(json!({ "name": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

    let (status, _) = send(&app, "GET", "/api/versions", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/jobs?status=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let env = TestEnv::idle().await;
    let app = router(&env);
    let missing = uuid::Uuid::new_v4();

    for uri in [
        format!("/api/projects/{}", missing),
        format!("/api/versions/{}", missing),
        format!("/api/versions/{}/lineage", missing),
        format!("/api/jobs/{}", missing),
    ] {
        let (status, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    let (status, _) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "projectId": missing, "type": "patch", "inputPrompt": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_version_routes_and_delete_guard() {
    let env = TestEnv::idle().await;
    let app = router(&env);
    let project_id = create_project(&app, "guarded").await;

    let v1 = create_version(&app, &project_id).await;
    let v2 = create_version(&app, &project_id).await;

    let (status, body) = send(&app, "POST", &format!("/api/versions/{}/stable", v1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isStable"], true);

    let (status, body) = send(&app, "GET", &format!("/api/versions/{}", v1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["label"], "v1");
    assert_eq!(body["data"]["files"][0]["path"], "a.txt");

    let (status, body) = send(&app, "DELETE", &format!("/api/versions/{}", v1), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = send(&app, "DELETE", &format!("/api/versions/{}", v2), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/versions?projectId={}", project_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        "POST",
        "/api/versions",
        Some(json!({ "projectId": project_id, "label": "v1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rollback_route() {
    let env = TestEnv::idle().await;
    let app = router(&env);
    let project_id = create_project(&app, "undo").await;
    let other_id = create_project(&app, "unrelated").await;

    let v1 = create_version(&app, &project_id).await;
    let v2 = create_version(&app, &project_id).await;
    let foreign = create_version(&app, &other_id).await;
    send(&app, "POST", &format!("/api/versions/{}/stable", v2), None).await;

    let uri = format!("/api/projects/{}/rollback", project_id);
    let (status, body) = send(&app, "POST", &uri, Some(json!({ "versionId": v1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stableVersionId"], v1.as_str());

    let (status, _) = send(&app, "POST", &uri, Some(json!({ "versionId": foreign }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_job_routes() {
    let env = TestEnv::idle().await;
    let app = router(&env);
    let project_id = create_project(&app, "jobs").await;

    let mut job_ids = Vec::new();
    for prompt in ["first", "second", "third"] {
        let (status, body) = send(
            &app,
            "POST",
            "/api/jobs",
            Some(json!({ "projectId": project_id, "type": "patch", "inputPrompt": prompt })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["type"], "patch");
        job_ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/jobs?projectId={}&limit=2", project_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["limit"], 2);
    assert_eq!(body["pagination"]["hasMore"], true);
    // Newest first
    assert_eq!(body["data"][0]["id"], job_ids[2].as_str());

    let job = &job_ids[0];
    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/jobs/{}/metadata", job),
        Some(json!({ "ticket": "OPS-12" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["metadata"]["ticket"], "OPS-12");
    assert_eq!(body["data"]["status"], "pending");

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/api/jobs/{}/metadata", job),
        Some(json!(["not", "an", "object"])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "DELETE", &format!("/api/jobs/{}", job), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");

    let (status, _) = send(&app, "DELETE", &format!("/api/jobs/{}", job), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, "GET", &format!("/api/jobs/{}", job), None).await;
    assert_eq!(status, StatusCode::OK);
    let messages: Vec<&str> = body["data"]["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["Job queued", "Job cancelled"]);
}

#[tokio::test]
async fn test_log_query_filters_by_minimum_level() {
    let env = TestEnv::idle().await;
    let app = router(&env);
    let project_id = create_project(&app, "noisy").await;

    create_version(&app, &project_id).await;
    // Writes a debug "Job queued" entry
    send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "projectId": project_id, "type": "review", "inputPrompt": "check" })),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/api/logs?projectId={}", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let all = body["data"].as_array().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0]["message"], "Job queued");

    let (_, body) = send(
        &app,
        "GET",
        &format!("/api/logs?projectId={}&level=info", project_id),
        None,
    )
    .await;
    let infos = body["data"].as_array().unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0]["message"], "Version v1 created");

    let (_, body) = send(
        &app,
        "GET",
        &format!("/api/logs?projectId={}&level=error", project_id),
        None,
    )
    .await;
    assert!(body["data"].as_array().unwrap().is_empty());
}
