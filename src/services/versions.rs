//! Version Store - ordered, labeled snapshots per project

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::db;
use crate::domain::{
    next_label, LogEntry, NewVersion, OrchestratorError, OrchestratorResult, Version,
    VersionWithFiles,
};
use crate::events::{Event, EventBus};

use super::LogSink;

type LabelLocks = Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Proof that the caller holds a project's label allocation lock
pub struct LabelGuard {
    project_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LabelLocks,
}

impl LabelGuard {
    pub fn project_id(&self) -> Uuid {
        self.project_id
    }
}

impl Drop for LabelGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters clone the entry under the map lock, so a count of one means
        // nobody else holds or waits for this project's lock
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.project_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.project_id);
        }
    }
}

/// Durable version history with label generation and the stable pointer
#[derive(Clone)]
pub struct VersionStore {
    pool: SqlitePool,
    events: EventBus,
    label_locks: LabelLocks,
}

impl VersionStore {
    pub fn new(pool: SqlitePool, events: EventBus) -> Self {
        Self {
            pool,
            events,
            label_locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Serialize label allocation for one project
    ///
    /// Take this before acquiring a connection; holding a connection while
    /// waiting for the lock can starve a small pool.
    pub async fn lock_project(&self, project_id: Uuid) -> LabelGuard {
        let lock = {
            let mut locks = self.label_locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(project_id).or_default())
        };
        LabelGuard {
            project_id,
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.label_locks),
        }
    }

    /// Create a version, generating a label when none is given
    pub async fn create(&self, new: NewVersion) -> OrchestratorResult<Version> {
        let guard = self.lock_project(new.project_id).await;
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before reading labels
        if !db::touch_project(&mut tx, &new.project_id).await? {
            return Err(OrchestratorError::not_found("Project", new.project_id));
        }

        let version = self.insert_locked(&mut tx, &guard, new).await?;
        let entry = LogSink::append_in(
            &mut tx,
            LogEntry::info(version.project_id, format!("Version {} created", version.label))
                .with_metadata(serde_json::json!({ "versionId": version.id })),
        )
        .await?;
        tx.commit().await?;
        drop(guard);

        LogSink::trace(&entry);
        self.publish_created(&version);
        Ok(version)
    }

    /// Insert a version while holding the project's label lock
    ///
    /// Validates the label and parent, allocates `v<n+1>` when the label is
    /// omitted, and writes the version with its files. Does not commit.
    pub async fn insert_locked(
        &self,
        conn: &mut SqliteConnection,
        guard: &LabelGuard,
        new: NewVersion,
    ) -> OrchestratorResult<Version> {
        if guard.project_id() != new.project_id {
            return Err(OrchestratorError::invalid(format!(
                "Label lock held for project {}, not {}",
                guard.project_id(),
                new.project_id
            )));
        }

        if let Some(parent_id) = new.parent_version_id {
            match db::get_version_on(conn, &parent_id).await? {
                Some(parent) if parent.project_id == new.project_id => {}
                Some(_) => {
                    return Err(OrchestratorError::invalid(format!(
                        "Parent version {} belongs to another project",
                        parent_id
                    )))
                }
                None => {
                    return Err(OrchestratorError::invalid(format!(
                        "Parent version {} does not exist",
                        parent_id
                    )))
                }
            }
        }

        let mut paths = HashSet::with_capacity(new.files.len());
        for file in &new.files {
            if file.path.trim().is_empty() {
                return Err(OrchestratorError::invalid("File path must not be empty"));
            }
            if !paths.insert(file.path.as_str()) {
                return Err(OrchestratorError::invalid(format!(
                    "Duplicate file path {}",
                    file.path
                )));
            }
        }

        let existing = db::list_labels(conn, &new.project_id).await?;
        let label = match new.label {
            Some(label) => {
                let label = label.trim().to_string();
                if label.is_empty() {
                    return Err(OrchestratorError::invalid("Label must not be empty"));
                }
                if existing.iter().any(|l| *l == label) {
                    return Err(OrchestratorError::conflict(format!(
                        "Label {} already exists in project {}",
                        label, new.project_id
                    )));
                }
                label
            }
            None => next_label(existing.iter().map(String::as_str)).ok_or_else(|| {
                OrchestratorError::conflict(format!(
                    "No label after the highest v<n> label is available in project {}",
                    new.project_id
                ))
            })?,
        };

        let version = Version {
            id: Uuid::new_v4(),
            project_id: new.project_id,
            label,
            description: new.description,
            parent_version_id: new.parent_version_id,
            job_id: new.job_id,
            is_stable: false,
            created_at: Utc::now(),
        };

        db::insert_version(conn, &version, &new.files)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err)
                    if db_err.is_unique_violation() && db_err.message().contains("versions.label") =>
                {
                    OrchestratorError::conflict(format!(
                        "Label {} already exists in project {}",
                        version.label, version.project_id
                    ))
                }
                _ => OrchestratorError::from(e),
            })?;

        Ok(version)
    }

    /// Get a version with its file-set
    pub async fn get(&self, version_id: &Uuid) -> OrchestratorResult<VersionWithFiles> {
        let version = db::get_version(&self.pool, version_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Version", version_id))?;
        let files = db::get_version_files(&self.pool, version_id).await?;

        Ok(VersionWithFiles { version, files })
    }

    /// List a project's versions, newest first
    pub async fn list(&self, project_id: &Uuid) -> OrchestratorResult<Vec<Version>> {
        if db::get_project(&self.pool, project_id).await?.is_none() {
            return Err(OrchestratorError::not_found("Project", project_id));
        }
        Ok(db::list_versions(&self.pool, project_id).await?)
    }

    /// The version followed by its ancestors, nearest first
    pub async fn lineage(&self, version_id: &Uuid) -> OrchestratorResult<Vec<Version>> {
        let lineage = db::version_lineage(&self.pool, version_id).await?;
        if lineage.is_empty() {
            return Err(OrchestratorError::not_found("Version", version_id));
        }
        Ok(lineage)
    }

    /// Make a version its project's stable version
    pub async fn mark_stable(&self, version_id: &Uuid) -> OrchestratorResult<Version> {
        self.point_stable(version_id, |label| format!("Version {} marked stable", label))
            .await
    }

    /// Move the stable pointer and record why in the project log
    pub(crate) async fn point_stable(
        &self,
        version_id: &Uuid,
        message: impl FnOnce(&str) -> String,
    ) -> OrchestratorResult<Version> {
        let mut tx = self.pool.begin().await?;

        if !db::set_stable_version(&mut tx, version_id).await? {
            return Err(OrchestratorError::not_found("Version", version_id));
        }
        let version = db::get_version_on(&mut tx, version_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Version", version_id))?;

        let entry = LogSink::append_in(
            &mut tx,
            LogEntry::info(version.project_id, message(&version.label))
                .with_metadata(serde_json::json!({ "versionId": version.id })),
        )
        .await?;
        tx.commit().await?;

        LogSink::trace(&entry);
        self.events.publish(Event::StablePointerMoved {
            project_id: version.project_id,
            version_id: version.id,
            timestamp: Utc::now(),
        });
        Ok(version)
    }

    /// Delete a version unless it is its project's stable version
    pub async fn delete(&self, version_id: &Uuid) -> OrchestratorResult<()> {
        let version = db::get_version(&self.pool, version_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Version", version_id))?;

        let mut tx = self.pool.begin().await?;
        if !db::delete_version_unless_stable(&mut tx, version_id).await? {
            return match db::get_version_on(&mut tx, version_id).await? {
                Some(v) => Err(OrchestratorError::conflict(format!(
                    "Version {} is the stable version of project {}",
                    v.label, v.project_id
                ))),
                None => Err(OrchestratorError::not_found("Version", version_id)),
            };
        }

        let entry = LogSink::append_in(
            &mut tx,
            LogEntry::info(version.project_id, format!("Version {} deleted", version.label))
                .with_metadata(serde_json::json!({ "versionId": version.id })),
        )
        .await?;
        tx.commit().await?;

        LogSink::trace(&entry);
        Ok(())
    }

    pub(crate) fn publish_created(&self, version: &Version) {
        self.events.publish(Event::VersionCreated {
            version_id: version.id,
            project_id: version.project_id,
            label: version.label.clone(),
            job_id: version.job_id,
            timestamp: Utc::now(),
        });
    }
}
