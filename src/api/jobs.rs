//! Job API routes

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use uuid::Uuid;

use crate::domain::{CreateJobRequest, Job, JobFilter, JobWithLogs};

use super::{ApiResponse, AppError, AppState, PaginatedResponse, Pagination};

/// Create job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(submit_job))
        .route("/:job_id", get(get_job).delete(cancel_job))
        .route("/:job_id/metadata", patch(annotate_job))
}

async fn list_jobs(
    State(state): State<AppState>,
    filter: Result<Query<JobFilter>, QueryRejection>,
) -> Result<Json<PaginatedResponse<Job>>, AppError> {
    let Query(filter) = filter?;
    let (limit, offset) = filter.normalized();
    let (jobs, total) = state.orchestrator.jobs.list(&filter).await?;

    let pagination = Pagination::new(total, limit, offset, jobs.len());
    Ok(Json(PaginatedResponse::new(jobs, pagination)))
}

/// Accept a job for background execution
async fn submit_job(
    State(state): State<AppState>,
    req: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Job>>), AppError> {
    let Json(req) = req?;
    let job = state.orchestrator.jobs.create(req).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::new(job))))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ApiResponse<JobWithLogs>>, AppError> {
    let job = state.orchestrator.jobs.get(&job_id).await?;
    Ok(Json(ApiResponse::new(job)))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let job = state.orchestrator.jobs.cancel(&job_id).await?;
    Ok(Json(ApiResponse::new(job)))
}

/// Merge caller-supplied keys into the job's metadata
async fn annotate_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    patch: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let Json(patch) = patch?;
    let job = state.orchestrator.jobs.annotate(&job_id, patch).await?;
    Ok(Json(ApiResponse::new(job)))
}
