//! Log entry database operations (append-only)

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{LogEntry, LogLevel, LogQuery, MAX_LOG_LIMIT};

use super::{format_timestamp, parse_optional_uuid, parse_timestamp};

/// Row type for log_entries table
#[derive(Debug, sqlx::FromRow)]
pub struct LogRow {
    pub seq: i64,
    pub id: String,
    pub project_id: String,
    pub job_id: Option<String>,
    pub level: String,
    pub message: String,
    pub metadata: Option<String>,
    pub created_at: String,
}

impl LogRow {
    pub fn to_entry(&self) -> LogEntry {
        LogEntry {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            seq: self.seq,
            project_id: Uuid::parse_str(&self.project_id).unwrap_or_default(),
            job_id: parse_optional_uuid(&self.job_id),
            level: self.level.parse().unwrap_or(LogLevel::Info),
            message: self.message.clone(),
            metadata: self
                .metadata
                .as_ref()
                .and_then(|s| serde_json::from_str(s).ok()),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

const LOG_COLUMNS: &str = "seq, id, project_id, job_id, level, message, metadata, created_at";

/// Append a log entry, returning its insertion sequence
pub async fn insert_log(conn: &mut SqliteConnection, entry: &LogEntry) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO log_entries (id, project_id, job_id, level, level_rank, message, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.project_id.to_string())
    .bind(entry.job_id.map(|id| id.to_string()))
    .bind(entry.level.to_string())
    .bind(entry.level.rank())
    .bind(&entry.message)
    .bind(entry.metadata.as_ref().map(|v| v.to_string()))
    .bind(format_timestamp(&entry.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Logs for one job in emission order
pub async fn get_logs_for_job(pool: &SqlitePool, job_id: &Uuid) -> Result<Vec<LogEntry>, sqlx::Error> {
    let query = format!(
        "SELECT {} FROM log_entries WHERE job_id = ? ORDER BY seq ASC",
        LOG_COLUMNS
    );
    let rows = sqlx::query_as::<_, LogRow>(&query)
        .bind(job_id.to_string())
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.to_entry()).collect())
}

/// Query logs, newest first
///
/// `level` is a minimum severity; `limit` is clamped to 1..=MAX_LOG_LIMIT.
pub async fn query_logs(pool: &SqlitePool, query: &LogQuery) -> Result<Vec<LogEntry>, sqlx::Error> {
    let mut sql = format!("SELECT {} FROM log_entries WHERE 1 = 1", LOG_COLUMNS);
    let mut args: Vec<String> = Vec::new();

    if let Some(project_id) = query.project_id {
        sql.push_str(" AND project_id = ?");
        args.push(project_id.to_string());
    }
    if let Some(job_id) = query.job_id {
        sql.push_str(" AND job_id = ?");
        args.push(job_id.to_string());
    }
    if query.level.is_some() {
        sql.push_str(" AND level_rank >= ?");
    }
    sql.push_str(" ORDER BY seq DESC LIMIT ?");

    let mut q = sqlx::query_as::<_, LogRow>(&sql);
    for arg in &args {
        q = q.bind(arg);
    }
    if let Some(level) = query.level {
        q = q.bind(level.rank());
    }
    let rows = q
        .bind(query.limit.clamp(1, MAX_LOG_LIMIT))
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.to_entry()).collect())
}
