//! Version API routes

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{CreateVersionRequest, OrchestratorError, Version, VersionWithFiles};

use super::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListQuery {
    pub project_id: Option<Uuid>,
}

/// Create version routes
pub fn version_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_versions).post(create_version))
        .route("/:version_id", get(get_version).delete(delete_version))
        .route("/:version_id/lineage", get(get_lineage))
        .route("/:version_id/stable", post(mark_stable))
}

async fn list_versions(
    State(state): State<AppState>,
    query: Result<Query<VersionListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Version>>>, AppError> {
    let Query(query) = query?;
    let project_id = query
        .project_id
        .ok_or_else(|| OrchestratorError::invalid("projectId is required"))?;

    let versions = state.orchestrator.versions.list(&project_id).await?;
    Ok(Json(ApiResponse::new(versions)))
}

async fn get_version(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
) -> Result<Json<ApiResponse<VersionWithFiles>>, AppError> {
    let version = state.orchestrator.versions.get(&version_id).await?;
    Ok(Json(ApiResponse::new(version)))
}

/// Ancestor chain, starting with the version itself
async fn get_lineage(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Version>>>, AppError> {
    let lineage = state.orchestrator.versions.lineage(&version_id).await?;
    Ok(Json(ApiResponse::new(lineage)))
}

async fn create_version(
    State(state): State<AppState>,
    req: Result<Json<CreateVersionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Version>>), AppError> {
    let Json(req) = req?;
    let version = state.orchestrator.versions.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(version))))
}

async fn mark_stable(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Version>>, AppError> {
    let version = state.orchestrator.versions.mark_stable(&version_id).await?;
    Ok(Json(ApiResponse::new(version)))
}

async fn delete_version(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.versions.delete(&version_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
