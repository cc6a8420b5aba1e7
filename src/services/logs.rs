//! Log Sink - append-only record of execution events

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::domain::{LogEntry, LogLevel, LogQuery, OrchestratorResult};

/// Durable, queryable log keyed by project and job
///
/// Every persisted entry is mirrored to `tracing` once it is visible to
/// readers.
#[derive(Clone)]
pub struct LogSink {
    pool: SqlitePool,
}

impl LogSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist an entry on its own and mirror it to tracing
    pub async fn append(&self, entry: LogEntry) -> OrchestratorResult<LogEntry> {
        let mut conn = self.pool.acquire().await?;
        let entry = Self::append_in(&mut conn, entry).await?;
        Self::trace(&entry);
        Ok(entry)
    }

    /// Persist an entry as part of a larger transaction
    ///
    /// The caller mirrors it with [`LogSink::trace`] after commit.
    pub async fn append_in(conn: &mut SqliteConnection, mut entry: LogEntry) -> OrchestratorResult<LogEntry> {
        entry.seq = db::insert_log(conn, &entry).await?;
        Ok(entry)
    }

    /// Emit a persisted entry through tracing at its own level
    pub fn trace(entry: &LogEntry) {
        let job_id = entry.job_id.map(|id| id.to_string()).unwrap_or_default();
        match entry.level {
            LogLevel::Debug => tracing::debug!(
                project_id = %entry.project_id,
                job_id = %job_id,
                seq = entry.seq,
                "{}",
                entry.message
            ),
            LogLevel::Info => tracing::info!(
                project_id = %entry.project_id,
                job_id = %job_id,
                seq = entry.seq,
                "{}",
                entry.message
            ),
            LogLevel::Warn => tracing::warn!(
                project_id = %entry.project_id,
                job_id = %job_id,
                seq = entry.seq,
                "{}",
                entry.message
            ),
            LogLevel::Error => tracing::error!(
                project_id = %entry.project_id,
                job_id = %job_id,
                seq = entry.seq,
                "{}",
                entry.message
            ),
        }
    }

    /// Query entries, newest first
    pub async fn query(&self, query: &LogQuery) -> OrchestratorResult<Vec<LogEntry>> {
        Ok(db::query_logs(&self.pool, query).await?)
    }

    /// All entries for a job in emission order
    pub async fn for_job(&self, job_id: &Uuid) -> OrchestratorResult<Vec<LogEntry>> {
        Ok(db::get_logs_for_job(&self.pool, job_id).await?)
    }
}
