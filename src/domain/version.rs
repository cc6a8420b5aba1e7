//! Version domain model: immutable labeled snapshots of a project

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A labeled snapshot of a project's file-set
///
/// `is_stable` is computed on read from `Project.stable_version_id`; it is
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: Uuid,
    pub project_id: Uuid,
    pub label: String,
    pub description: Option<String>,
    pub parent_version_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub is_stable: bool,
    pub created_at: DateTime<Utc>,
}

/// One file of a version's file-set; `content` is an opaque reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionFile {
    pub path: String,
    pub content: String,
}

impl VersionFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Version with its attached file-set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionWithFiles {
    #[serde(flatten)]
    pub version: Version,
    pub files: Vec<VersionFile>,
}

/// Parameters for creating a version, from the API or from a finished job
#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub project_id: Uuid,
    pub label: Option<String>,
    pub description: Option<String>,
    pub parent_version_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub files: Vec<VersionFile>,
}

impl NewVersion {
    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            project_id,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parent(mut self, parent_version_id: Uuid) -> Self {
        self.parent_version_id = Some(parent_version_id);
        self
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_files(mut self, files: Vec<VersionFile>) -> Self {
        self.files = files;
        self
    }
}

/// Request body for `POST /versions`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionRequest {
    pub project_id: Uuid,
    pub label: Option<String>,
    pub description: Option<String>,
    pub parent_version_id: Option<Uuid>,
    pub files: Option<Vec<VersionFile>>,
}

impl From<CreateVersionRequest> for NewVersion {
    fn from(req: CreateVersionRequest) -> Self {
        Self {
            project_id: req.project_id,
            label: req.label,
            description: req.description,
            parent_version_id: req.parent_version_id,
            job_id: None,
            files: req.files.unwrap_or_default(),
        }
    }
}

fn label_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v(\d+)$").ok()).as_ref()
}

/// Integer suffix of a generated-style label (`v12` → 12)
pub fn label_number(label: &str) -> Option<u64> {
    label_pattern()?
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Next sequential label given a project's existing labels
///
/// Takes the highest integer suffix among `v<n>` labels; labels of any other
/// shape are ignored. Starts at `v1`. `None` once the suffix cannot grow.
pub fn next_label<'a>(existing: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let highest = existing
        .into_iter()
        .filter_map(label_number)
        .max()
        .unwrap_or(0);
    highest.checked_add(1).map(|n| format!("v{}", n))
}
