//! Project API routes

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::domain::{
    CreateProjectRequest, Project, ProjectDetails, ProjectFilter, RollbackRequest,
    UpdateProjectRequest,
};

use super::{ApiResponse, AppError, AppState};

/// Create project routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route(
            "/:project_id",
            get(get_project).put(update_project).delete(archive_project),
        )
        .route("/:project_id/rollback", post(rollback_project))
}

async fn list_projects(
    State(state): State<AppState>,
    filter: Result<Query<ProjectFilter>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Project>>>, AppError> {
    let Query(filter) = filter?;
    let projects = state.orchestrator.projects.list(&filter).await?;
    Ok(Json(ApiResponse::new(projects)))
}

async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ProjectDetails>>, AppError> {
    let details = state.orchestrator.projects.get(&project_id).await?;
    Ok(Json(ApiResponse::new(details)))
}

async fn create_project(
    State(state): State<AppState>,
    req: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Project>>), AppError> {
    let Json(req) = req?;
    let project = state.orchestrator.projects.create(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(project))))
}

async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    req: Result<Json<UpdateProjectRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Project>>, AppError> {
    let Json(req) = req?;
    let project = state.orchestrator.projects.update(&project_id, req).await?;
    Ok(Json(ApiResponse::new(project)))
}

/// Archive rather than delete; versions and history stay readable
async fn archive_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Project>>, AppError> {
    let project = state.orchestrator.projects.archive(&project_id).await?;
    Ok(Json(ApiResponse::new(project)))
}

async fn rollback_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    req: Result<Json<RollbackRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Project>>, AppError> {
    let Json(req) = req?;
    let project = state
        .orchestrator
        .projects
        .rollback(&project_id, &req.version_id)
        .await?;
    Ok(Json(ApiResponse::new(project)))
}
