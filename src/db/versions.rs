//! Version database operations

use std::collections::HashSet;

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{Version, VersionFile};

use super::{format_timestamp, parse_optional_uuid, parse_timestamp};

/// Versions joined with their project so `is_stable` is derived from the pointer
const VERSION_SELECT: &str = r#"
    SELECT v.id, v.project_id, v.label, v.description, v.parent_version_id, v.job_id, v.created_at,
           CASE WHEN p.stable_version_id = v.id THEN 1 ELSE 0 END AS is_stable
    FROM versions v
    JOIN projects p ON p.id = v.project_id
"#;

/// Upper bound on lineage depth walked by the recursive query
const MAX_LINEAGE_DEPTH: i64 = 10_000;

/// Row type for versions table
#[derive(Debug, sqlx::FromRow)]
pub struct VersionRow {
    pub id: String,
    pub project_id: String,
    pub label: String,
    pub description: Option<String>,
    pub parent_version_id: Option<String>,
    pub job_id: Option<String>,
    pub created_at: String,
    pub is_stable: i64,
}

impl VersionRow {
    pub fn to_version(&self) -> Version {
        Version {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            project_id: Uuid::parse_str(&self.project_id).unwrap_or_default(),
            label: self.label.clone(),
            description: self.description.clone(),
            parent_version_id: parse_optional_uuid(&self.parent_version_id),
            job_id: parse_optional_uuid(&self.job_id),
            is_stable: self.is_stable != 0,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VersionFileRow {
    path: String,
    content: String,
}

/// Get a version by ID
pub async fn get_version(pool: &SqlitePool, version_id: &Uuid) -> Result<Option<Version>, sqlx::Error> {
    let query = format!("{} WHERE v.id = ?", VERSION_SELECT);
    let row = sqlx::query_as::<_, VersionRow>(&query)
        .bind(version_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_version()))
}

/// Get a version by ID on an open connection or transaction
pub async fn get_version_on(
    conn: &mut SqliteConnection,
    version_id: &Uuid,
) -> Result<Option<Version>, sqlx::Error> {
    let query = format!("{} WHERE v.id = ?", VERSION_SELECT);
    let row = sqlx::query_as::<_, VersionRow>(&query)
        .bind(version_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| r.to_version()))
}

/// List a project's versions, newest first
pub async fn list_versions(pool: &SqlitePool, project_id: &Uuid) -> Result<Vec<Version>, sqlx::Error> {
    let query = format!(
        "{} WHERE v.project_id = ? ORDER BY v.created_at DESC, v.rowid DESC",
        VERSION_SELECT
    );
    let rows = sqlx::query_as::<_, VersionRow>(&query)
        .bind(project_id.to_string())
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.to_version()).collect())
}

/// All labels in use for a project
pub async fn list_labels(conn: &mut SqliteConnection, project_id: &Uuid) -> Result<Vec<String>, sqlx::Error> {
    let labels: Vec<(String,)> = sqlx::query_as("SELECT label FROM versions WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    Ok(labels.into_iter().map(|(label,)| label).collect())
}

/// Number of versions a project holds
pub async fn count_versions(pool: &SqlitePool, project_id: &Uuid) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM versions WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Insert a version row together with its file-set
pub async fn insert_version(
    conn: &mut SqliteConnection,
    version: &Version,
    files: &[VersionFile],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO versions (id, project_id, label, description, parent_version_id, job_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(version.id.to_string())
    .bind(version.project_id.to_string())
    .bind(&version.label)
    .bind(&version.description)
    .bind(version.parent_version_id.map(|id| id.to_string()))
    .bind(version.job_id.map(|id| id.to_string()))
    .bind(format_timestamp(&version.created_at))
    .execute(&mut *conn)
    .await?;

    for file in files {
        sqlx::query("INSERT INTO version_files (id, version_id, path, content) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(version.id.to_string())
            .bind(&file.path)
            .bind(&file.content)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// File-set of a version, ordered by path
pub async fn get_version_files(pool: &SqlitePool, version_id: &Uuid) -> Result<Vec<VersionFile>, sqlx::Error> {
    let rows = sqlx::query_as::<_, VersionFileRow>(
        "SELECT path, content FROM version_files WHERE version_id = ? ORDER BY path",
    )
    .bind(version_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| VersionFile {
            path: r.path,
            content: r.content,
        })
        .collect())
}

/// Delete a version unless some project currently points at it as stable
///
/// The guard is evaluated in the same statement as the delete, so a
/// concurrent pointer move cannot slip between check and removal.
/// Returns false when nothing was deleted.
pub async fn delete_version_unless_stable(
    conn: &mut SqliteConnection,
    version_id: &Uuid,
) -> Result<bool, sqlx::Error> {
    let id = version_id.to_string();
    let result = sqlx::query(
        r#"
        DELETE FROM versions
        WHERE id = ?
          AND NOT EXISTS (SELECT 1 FROM projects WHERE stable_version_id = ?)
        "#,
    )
    .bind(&id)
    .bind(&id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Ancestry of a version, starting with the version itself and ending at its root
pub async fn version_lineage(pool: &SqlitePool, version_id: &Uuid) -> Result<Vec<Version>, sqlx::Error> {
    let query = format!(
        r#"
        WITH RECURSIVE lineage(id, depth) AS (
            SELECT id, 0 FROM versions WHERE id = ?
            UNION ALL
            SELECT v.parent_version_id, l.depth + 1
            FROM versions v
            JOIN lineage l ON v.id = l.id
            WHERE v.parent_version_id IS NOT NULL AND l.depth < ?
        )
        SELECT sel.* FROM lineage l
        JOIN ({}) sel ON sel.id = l.id
        ORDER BY l.depth
        "#,
        VERSION_SELECT
    );

    let rows = sqlx::query_as::<_, VersionRow>(&query)
        .bind(version_id.to_string())
        .bind(MAX_LINEAGE_DEPTH)
        .fetch_all(pool)
        .await?;

    let mut seen = HashSet::new();
    let mut lineage = Vec::with_capacity(rows.len());
    for row in rows {
        let version = row.to_version();
        if !seen.insert(version.id) {
            break;
        }
        lineage.push(version);
    }

    Ok(lineage)
}
