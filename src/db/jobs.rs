//! Job database operations
//!
//! Status changes are compare-and-set updates: the `WHERE status IN (...)`
//! clause decides which of two racing writers wins, and `rows_affected`
//! tells the caller whether it was them.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{Job, JobFilter, JobStatus, JobType};

use super::{format_timestamp, parse_optional_timestamp, parse_optional_uuid, parse_timestamp};

/// Row type for jobs table
#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub id: String,
    pub project_id: String,
    pub job_type: String,
    pub prompt_profile_id: Option<String>,
    pub context_data: Option<String>,
    pub input_prompt: String,
    pub status: String,
    pub metadata: String,
    pub mark_stable: i64,
    pub base_version_id: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    pub fn to_job(&self) -> Job {
        Job {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            project_id: Uuid::parse_str(&self.project_id).unwrap_or_default(),
            job_type: self.job_type.parse().unwrap_or(JobType::Debug),
            prompt_profile_id: self.prompt_profile_id.clone(),
            context_data: self
                .context_data
                .as_ref()
                .and_then(|s| serde_json::from_str(s).ok()),
            input_prompt: self.input_prompt.clone(),
            status: self.status.parse().unwrap_or(JobStatus::Failed),
            metadata: serde_json::from_str(&self.metadata).unwrap_or_else(|_| serde_json::json!({})),
            mark_stable: self.mark_stable != 0,
            base_version_id: parse_optional_uuid(&self.base_version_id),
            started_at: parse_optional_timestamp(&self.started_at),
            completed_at: parse_optional_timestamp(&self.completed_at),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

/// Insert a new job
pub async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, project_id, job_type, prompt_profile_id, context_data, input_prompt,
            status, metadata, mark_stable, base_version_id, started_at, completed_at,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.project_id.to_string())
    .bind(job.job_type.to_string())
    .bind(&job.prompt_profile_id)
    .bind(job.context_data.as_ref().map(|v| v.to_string()))
    .bind(&job.input_prompt)
    .bind(job.status.to_string())
    .bind(job.metadata.to_string())
    .bind(job.mark_stable as i64)
    .bind(job.base_version_id.map(|id| id.to_string()))
    .bind(job.started_at.as_ref().map(format_timestamp))
    .bind(job.completed_at.as_ref().map(format_timestamp))
    .bind(format_timestamp(&job.created_at))
    .bind(format_timestamp(&job.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &SqlitePool, job_id: &Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_job()))
}

/// Get a job by ID on an open connection or transaction
pub async fn get_job_on(conn: &mut SqliteConnection, job_id: &Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| r.to_job()))
}

fn filter_clause(filter: &JobFilter) -> (String, Vec<String>) {
    let mut clause = String::from(" WHERE 1 = 1");
    let mut args = Vec::new();

    if let Some(project_id) = filter.project_id {
        clause.push_str(" AND project_id = ?");
        args.push(project_id.to_string());
    }
    if let Some(status) = filter.status {
        clause.push_str(" AND status = ?");
        args.push(status.to_string());
    }
    if let Some(job_type) = filter.job_type {
        clause.push_str(" AND job_type = ?");
        args.push(job_type.to_string());
    }

    (clause, args)
}

/// List jobs matching a filter, newest first
pub async fn list_jobs(pool: &SqlitePool, filter: &JobFilter) -> Result<Vec<Job>, sqlx::Error> {
    let (clause, args) = filter_clause(filter);
    let (limit, offset) = filter.normalized();
    let query = format!(
        "SELECT * FROM jobs{} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        clause
    );

    let mut q = sqlx::query_as::<_, JobRow>(&query);
    for arg in &args {
        q = q.bind(arg);
    }
    let rows = q.bind(limit).bind(offset).fetch_all(pool).await?;

    Ok(rows.into_iter().map(|r| r.to_job()).collect())
}

/// Count jobs matching a filter, ignoring pagination
pub async fn count_jobs(pool: &SqlitePool, filter: &JobFilter) -> Result<i64, sqlx::Error> {
    let (clause, args) = filter_clause(filter);
    let query = format!("SELECT COUNT(*) FROM jobs{}", clause);

    let mut q = sqlx::query_as::<_, (i64,)>(&query);
    for arg in &args {
        q = q.bind(arg);
    }
    let (count,) = q.fetch_one(pool).await?;

    Ok(count)
}

/// IDs of jobs in a status, oldest first
pub async fn list_job_ids_by_status(pool: &SqlitePool, status: JobStatus) -> Result<Vec<Uuid>, sqlx::Error> {
    let ids: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC")
            .bind(status.to_string())
            .fetch_all(pool)
            .await?;

    Ok(ids
        .into_iter()
        .filter_map(|(id,)| Uuid::parse_str(&id).ok())
        .collect())
}

/// Move a job from one of `from` to `to`, merging `patch` into its metadata
///
/// Sets `started_at` on entering `running` and `completed_at` on entering a
/// terminal status. Returns false when the job was not in any of `from`.
pub async fn transition_job(
    conn: &mut SqliteConnection,
    job_id: &Uuid,
    from: &[JobStatus],
    to: JobStatus,
    patch: Option<&serde_json::Value>,
) -> Result<bool, sqlx::Error> {
    if from.is_empty() {
        return Ok(false);
    }

    let now = format_timestamp(&Utc::now());
    let started_at = (to == JobStatus::Running).then(|| now.clone());
    let completed_at = to.is_terminal().then(|| now.clone());
    let patch = patch
        .map(|p| p.to_string())
        .unwrap_or_else(|| "{}".to_string());

    let placeholders = vec!["?"; from.len()].join(", ");
    let query = format!(
        r#"
        UPDATE jobs
        SET status = ?,
            updated_at = ?,
            started_at = COALESCE(?, started_at),
            completed_at = COALESCE(?, completed_at),
            metadata = json_patch(metadata, ?)
        WHERE id = ? AND status IN ({})
        "#,
        placeholders
    );

    let mut q = sqlx::query(&query)
        .bind(to.to_string())
        .bind(&now)
        .bind(started_at)
        .bind(completed_at)
        .bind(patch)
        .bind(job_id.to_string());
    for status in from {
        q = q.bind(status.to_string());
    }

    let result = q.execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

/// Merge a JSON object into a job's metadata without touching its status
pub async fn merge_job_metadata(
    conn: &mut SqliteConnection,
    job_id: &Uuid,
    patch: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE jobs SET metadata = json_patch(metadata, ?), updated_at = ? WHERE id = ?")
        .bind(patch.to_string())
        .bind(format_timestamp(&Utc::now()))
        .bind(job_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
