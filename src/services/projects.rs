//! Project Lifecycle Manager - project metadata and the stable pointer

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::domain::{
    CreateProjectRequest, LogEntry, OrchestratorError, OrchestratorResult, Project, ProjectChanges,
    ProjectDetails, ProjectFilter, ProjectStatus, ProjectType, SourceKind, UpdateProjectRequest,
};
use crate::events::{Event, EventBus};

use super::{LogSink, VersionStore};

#[derive(Clone)]
pub struct ProjectManager {
    pool: SqlitePool,
    versions: VersionStore,
    events: EventBus,
}

impl ProjectManager {
    pub fn new(pool: SqlitePool, versions: VersionStore, events: EventBus) -> Self {
        Self {
            pool,
            versions,
            events,
        }
    }

    pub async fn create(&self, req: CreateProjectRequest) -> OrchestratorResult<Project> {
        let name = validate_name(&req.name)?;
        let project_type = parse_project_type(&req.project_type)?;
        let source_kind = parse_source_kind(&req.source_kind)?;

        let mut project = Project::new(name, project_type, source_kind);
        project.description = req.description;
        project.source_location = req.source_location;
        project.source_branch = req.source_branch;

        db::insert_project(&self.pool, &project).await?;
        tracing::info!(project_id = %project.id, name = %project.name, "Project created");

        Ok(project)
    }

    /// Project with its stable version, version count and job counts
    pub async fn get(&self, project_id: &Uuid) -> OrchestratorResult<ProjectDetails> {
        let project = self.find(project_id).await?;

        let stable_version = match project.stable_version_id {
            Some(version_id) => db::get_version(&self.pool, &version_id).await?,
            None => None,
        };
        let version_count = db::count_versions(&self.pool, project_id).await?;
        let job_counts = db::count_jobs_by_status(&self.pool, project_id).await?;

        Ok(ProjectDetails {
            project,
            stable_version,
            version_count,
            job_counts,
        })
    }

    pub async fn list(&self, filter: &ProjectFilter) -> OrchestratorResult<Vec<Project>> {
        Ok(db::list_projects(&self.pool, filter).await?)
    }

    /// Apply a partial update; only supplied fields change
    pub async fn update(&self, project_id: &Uuid, req: UpdateProjectRequest) -> OrchestratorResult<Project> {
        let changes = ProjectChanges {
            name: req.name.as_deref().map(validate_name).transpose()?,
            description: req.description,
            project_type: req.project_type.as_deref().map(parse_project_type).transpose()?,
            source_kind: req.source_kind.as_deref().map(parse_source_kind).transpose()?,
            source_location: req.source_location,
            source_branch: req.source_branch,
        };

        if !changes.is_empty() && !db::update_project(&self.pool, project_id, &changes).await? {
            return Err(OrchestratorError::not_found("Project", project_id));
        }

        self.find(project_id).await
    }

    /// Soft-delete a project; versions, jobs and logs are untouched
    pub async fn archive(&self, project_id: &Uuid) -> OrchestratorResult<Project> {
        let project = self.find(project_id).await?;
        if project.is_archived() {
            return Ok(project);
        }

        let mut tx = self.pool.begin().await?;
        if !db::set_project_status(&mut tx, project_id, ProjectStatus::Archived).await? {
            return Err(OrchestratorError::not_found("Project", project_id));
        }
        let entry = LogSink::append_in(&mut tx, LogEntry::info(*project_id, "Project archived")).await?;
        tx.commit().await?;

        LogSink::trace(&entry);
        self.events.publish(Event::ProjectArchived {
            project_id: *project_id,
            timestamp: Utc::now(),
        });

        self.find(project_id).await
    }

    /// Point the project's stable pointer at an earlier version
    pub async fn rollback(&self, project_id: &Uuid, version_id: &Uuid) -> OrchestratorResult<Project> {
        self.find(project_id).await?;

        let version = db::get_version(&self.pool, version_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Version", version_id))?;
        if version.project_id != *project_id {
            return Err(OrchestratorError::invalid(format!(
                "Version {} belongs to project {}, not {}",
                version_id, version.project_id, project_id
            )));
        }

        self.versions
            .point_stable(version_id, |label| format!("Rolled back to version {}", label))
            .await?;

        self.find(project_id).await
    }

    async fn find(&self, project_id: &Uuid) -> OrchestratorResult<Project> {
        db::get_project(&self.pool, project_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Project", project_id))
    }
}

fn validate_name(name: &str) -> OrchestratorResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(OrchestratorError::invalid("Project name must not be empty"));
    }
    Ok(name.to_string())
}

fn parse_project_type(value: &str) -> OrchestratorResult<ProjectType> {
    value.parse().map_err(OrchestratorError::InvalidArgument)
}

fn parse_source_kind(value: &str) -> OrchestratorResult<SourceKind> {
    value.parse().map_err(OrchestratorError::InvalidArgument)
}
