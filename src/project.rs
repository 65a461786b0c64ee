//! Registry of repositories the user has opened.
//!
//! Each project gets its own directory under the projects directory, named
//! after its [`ProjectId`](crate::identity::ProjectId), holding a small JSON
//! record:
//!
//! ```text
//! <projects_dir>/<name>-<hash>/config   {"version":1,"path":"/abs/repo"}
//! ```
//!
//! The record is independent of workspace state. Other files in a project
//! directory belong to other features and are left alone.

use crate::fsutil::{read_optional, write_atomic};
use crate::git::GitRunner;
use crate::identity::{absolute_path, dir_name_for, project_display_name, project_id, ProjectId};
use crate::workspace::{Workspace, WorktreeProvider};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Current project record schema version.
pub const PROJECT_RECORD_VERSION: u32 = 1;

/// File name of the record inside a project directory.
pub const PROJECT_RECORD_FILE: &str = "config";

#[derive(Debug, Serialize, Deserialize)]
struct ProjectRecord {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    path: Option<PathBuf>,
}

/// An opened repository and its workspaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub path: PathBuf,
    pub name: String,
    pub workspaces: Vec<Workspace>,
}

impl Project {
    /// Build a project for the provider's repository, discovering its
    /// workspaces. The ID is always recomputed from the path.
    pub async fn open<G: GitRunner + Clone>(provider: &WorktreeProvider<G>) -> Result<Self> {
        let path = provider.repo_path().to_path_buf();
        Ok(Self {
            id: project_id(&path),
            name: project_display_name(&path),
            workspaces: provider.discover().await?,
            path,
        })
    }
}

/// Persists the set of opened repositories across restarts.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects_dir: PathBuf,
}

impl ProjectRegistry {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Location of the record for `path`.
    pub fn record_path(&self, path: &Path) -> Result<PathBuf> {
        let path = absolute_path(path)?;
        Ok(self
            .projects_dir
            .join(dir_name_for(&path))
            .join(PROJECT_RECORD_FILE))
    }

    /// Write (or overwrite) the record for `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let path = absolute_path(path)?;
        let record = ProjectRecord {
            version: PROJECT_RECORD_VERSION,
            path: Some(path.clone()),
        };
        let record_path = self.record_path(&path)?;
        write_atomic(&record_path, serde_json::to_vec_pretty(&record)?).await?;
        debug!(path = %path.display(), record = %record_path.display(), "project saved");
        Ok(())
    }

    /// Paths of every saved project, sorted.
    ///
    /// Unreadable, malformed or path-less records are skipped. A missing
    /// projects directory yields an empty list.
    pub async fn load_all(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.projects_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let record_path = entry.path().join(PROJECT_RECORD_FILE);
            let bytes = match read_optional(&record_path).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(dir = %entry.path().display(), "no project record, skipping");
                    continue;
                }
                Err(e) => {
                    debug!(dir = %entry.path().display(), error = %e, "unreadable project record");
                    continue;
                }
            };
            match serde_json::from_slice::<ProjectRecord>(&bytes) {
                Ok(ProjectRecord {
                    path: Some(path), ..
                }) => paths.push(path),
                Ok(_) => debug!(record = %record_path.display(), "project record has no path"),
                Err(e) => debug!(record = %record_path.display(), error = %e, "malformed project record"),
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Delete the record for `path`, and its directory if nothing else is
    /// left in it. Removing an unsaved project is a no-op.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        let record_path = self.record_path(path)?;
        match tokio::fs::remove_file(&record_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if let Some(dir) = record_path.parent() {
            let mut remaining = tokio::fs::read_dir(dir).await?;
            if remaining.next_entry().await?.is_none() {
                tokio::fs::remove_dir(dir).await?;
            }
        }
        debug!(path = %path.display(), "project removed");
        Ok(())
    }
}
