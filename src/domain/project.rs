//! Project domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Version;

/// Kind of application a project holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    StaticSite,
    SinglePageApp,
    Dashboard,
    ServerApp,
    Other,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::StaticSite => "static_site",
            ProjectType::SinglePageApp => "single_page_app",
            ProjectType::Dashboard => "dashboard",
            ProjectType::ServerApp => "server_app",
            ProjectType::Other => "other",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('-', "_").as_str() {
            "static_site" => Ok(ProjectType::StaticSite),
            "single_page_app" | "spa" => Ok(ProjectType::SinglePageApp),
            "dashboard" => Ok(ProjectType::Dashboard),
            "server_app" => Ok(ProjectType::ServerApp),
            "other" => Ok(ProjectType::Other),
            _ => Err(format!("Unknown project type: {}", s)),
        }
    }
}

/// Where the project's source lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    RemoteRepo,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::RemoteRepo => "remote_repo",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('-', "_").as_str() {
            "local" => Ok(SourceKind::Local),
            "remote_repo" => Ok(SourceKind::RemoteRepo),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

/// Project status; archival is a soft delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(ProjectStatus::Active),
            "archived" => Ok(ProjectStatus::Archived),
            _ => Err(format!("Unknown project status: {}", s)),
        }
    }
}

/// A project is a tracked unit of source material with a movable stable pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub project_type: ProjectType,
    pub source_kind: SourceKind,
    pub source_location: Option<String>,
    pub source_branch: Option<String>,
    pub status: ProjectStatus,
    pub stable_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: String, project_type: ProjectType, source_kind: SourceKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            description: None,
            project_type,
            source_kind,
            source_location: None,
            source_branch: None,
            status: ProjectStatus::Active,
            stable_version_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status == ProjectStatus::Archived
    }
}

/// Request to create a new project
///
/// Enum fields arrive as strings so that unknown values surface as
/// `InvalidArgument` rather than a body rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub project_type: String,
    pub source_kind: String,
    pub source_location: Option<String>,
    pub source_branch: Option<String>,
}

/// Request to update a project; only supplied fields change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub project_type: Option<String>,
    pub source_kind: Option<String>,
    pub source_location: Option<String>,
    pub source_branch: Option<String>,
}

/// Validated partial update, produced from an `UpdateProjectRequest`
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub project_type: Option<ProjectType>,
    pub source_kind: Option<SourceKind>,
    pub source_location: Option<String>,
    pub source_branch: Option<String>,
}

impl ProjectChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.project_type.is_none()
            && self.source_kind.is_none()
            && self.source_location.is_none()
            && self.source_branch.is_none()
    }
}

/// Filter for project listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    #[serde(rename = "type")]
    pub project_type: Option<ProjectType>,
}

/// Job counts per status for one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub pending: i64,
    pub running: i64,
    pub success: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Project with its resolved stable version and aggregate counts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetails {
    #[serde(flatten)]
    pub project: Project,
    pub stable_version: Option<Version>,
    pub version_count: i64,
    pub job_counts: JobCounts,
}

/// Rollback request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub version_id: Uuid,
}
