//! Log API routes

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};

use crate::domain::{LogEntry, LogQuery};

use super::{ApiResponse, AppError, AppState};

/// Create log routes
pub fn log_routes() -> Router<AppState> {
    Router::new().route("/", get(query_logs))
}

/// Newest first; `level` is a minimum severity
async fn query_logs(
    State(state): State<AppState>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<LogEntry>>>, AppError> {
    let Query(query) = query?;
    let entries = state.orchestrator.logs.query(&query).await?;
    Ok(Json(ApiResponse::new(entries)))
}
