//! Project database operations

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    JobCounts, Project, ProjectChanges, ProjectFilter, ProjectStatus, ProjectType, SourceKind,
};

use super::{format_timestamp, parse_optional_uuid, parse_timestamp};

/// Row type for projects table
#[derive(Debug, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub project_type: String,
    pub source_kind: String,
    pub source_location: Option<String>,
    pub source_branch: Option<String>,
    pub status: String,
    pub stable_version_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    pub fn to_project(&self) -> Project {
        Project {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            name: self.name.clone(),
            description: self.description.clone(),
            project_type: self.project_type.parse().unwrap_or(ProjectType::Other),
            source_kind: self.source_kind.parse().unwrap_or(SourceKind::Local),
            source_location: self.source_location.clone(),
            source_branch: self.source_branch.clone(),
            status: self.status.parse().unwrap_or(ProjectStatus::Active),
            stable_version_id: parse_optional_uuid(&self.stable_version_id),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

/// Get a project by ID
pub async fn get_project(pool: &SqlitePool, project_id: &Uuid) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
        .bind(project_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_project()))
}

/// Get a project by ID on an open connection or transaction
pub async fn get_project_on(
    conn: &mut SqliteConnection,
    project_id: &Uuid,
) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
        .bind(project_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| r.to_project()))
}

/// List projects, most recently updated first
pub async fn list_projects(pool: &SqlitePool, filter: &ProjectFilter) -> Result<Vec<Project>, sqlx::Error> {
    let mut query = String::from("SELECT * FROM projects WHERE 1 = 1");
    let mut args: Vec<String> = Vec::new();

    if let Some(status) = filter.status {
        query.push_str(" AND status = ?");
        args.push(status.to_string());
    }
    if let Some(project_type) = filter.project_type {
        query.push_str(" AND project_type = ?");
        args.push(project_type.to_string());
    }

    query.push_str(" ORDER BY updated_at DESC, rowid DESC");

    let mut q = sqlx::query_as::<_, ProjectRow>(&query);
    for arg in &args {
        q = q.bind(arg);
    }

    let rows = q.fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| r.to_project()).collect())
}

/// Insert a new project
pub async fn insert_project(pool: &SqlitePool, project: &Project) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO projects (
            id, name, description, project_type, source_kind, source_location,
            source_branch, status, stable_version_id, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(project.id.to_string())
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.project_type.to_string())
    .bind(project.source_kind.to_string())
    .bind(&project.source_location)
    .bind(&project.source_branch)
    .bind(project.status.to_string())
    .bind(project.stable_version_id.map(|id| id.to_string()))
    .bind(format_timestamp(&project.created_at))
    .bind(format_timestamp(&project.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Apply a partial update; returns false if the project does not exist
pub async fn update_project(
    pool: &SqlitePool,
    project_id: &Uuid,
    changes: &ProjectChanges,
) -> Result<bool, sqlx::Error> {
    let mut updates = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(name) = &changes.name {
        updates.push("name = ?");
        bindings.push(name.clone());
    }
    if let Some(desc) = &changes.description {
        updates.push("description = ?");
        bindings.push(desc.clone());
    }
    if let Some(project_type) = changes.project_type {
        updates.push("project_type = ?");
        bindings.push(project_type.to_string());
    }
    if let Some(source_kind) = changes.source_kind {
        updates.push("source_kind = ?");
        bindings.push(source_kind.to_string());
    }
    if let Some(location) = &changes.source_location {
        updates.push("source_location = ?");
        bindings.push(location.clone());
    }
    if let Some(branch) = &changes.source_branch {
        updates.push("source_branch = ?");
        bindings.push(branch.clone());
    }

    updates.push("updated_at = ?");
    bindings.push(format_timestamp(&Utc::now()));

    let query = format!("UPDATE projects SET {} WHERE id = ?", updates.join(", "));

    let mut q = sqlx::query(&query);
    for binding in &bindings {
        q = q.bind(binding);
    }
    let result = q.bind(project_id.to_string()).execute(pool).await?;

    Ok(result.rows_affected() > 0)
}

/// Set the project status; returns false if the project does not exist
pub async fn set_project_status(
    conn: &mut SqliteConnection,
    project_id: &Uuid,
    status: ProjectStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(format_timestamp(&Utc::now()))
        .bind(project_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Bump a project's `updated_at`; false if the project does not exist
pub async fn touch_project(conn: &mut SqliteConnection, project_id: &Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
        .bind(format_timestamp(&Utc::now()))
        .bind(project_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Point the owning project's stable pointer at a version
///
/// The owning project is resolved from the version row inside the same
/// statement, so the pointer can never reference another project's version.
/// Returns false if the version does not exist.
pub async fn set_stable_version(
    conn: &mut SqliteConnection,
    version_id: &Uuid,
) -> Result<bool, sqlx::Error> {
    let id = version_id.to_string();
    let result = sqlx::query(
        r#"
        UPDATE projects
        SET stable_version_id = ?, updated_at = ?
        WHERE id = (SELECT project_id FROM versions WHERE id = ?)
        "#,
    )
    .bind(&id)
    .bind(format_timestamp(&Utc::now()))
    .bind(&id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count jobs per status for a project
pub async fn count_jobs_by_status(pool: &SqlitePool, project_id: &Uuid) -> Result<JobCounts, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct StatusCountRow {
        status: String,
        count: i64,
    }

    let rows = sqlx::query_as::<_, StatusCountRow>(
        "SELECT status, COUNT(*) as count FROM jobs WHERE project_id = ? GROUP BY status",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts = JobCounts::default();
    for row in rows {
        match row.status.as_str() {
            "pending" => counts.pending = row.count,
            "running" => counts.running = row.count,
            "success" => counts.success = row.count,
            "failed" => counts.failed = row.count,
            "cancelled" => counts.cancelled = row.count,
            _ => {}
        }
    }

    Ok(counts)
}
