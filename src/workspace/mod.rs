//! Workspaces: git worktrees bound to a branch, plus their metadata.
//!
//! A workspace moves through `absent → created → (metadata-updated)* →
//! removed`. Its name is its branch name, its directory lives under the
//! provider's workspaces directory, and its metadata lives in the
//! repository's git config (see [`metadata`]).

pub mod metadata;

pub use metadata::{MetadataKey, MetadataStore, WorkspaceMetadata, BASE_KEY, METADATA_NAMESPACE};

use crate::git::{run_checked, GitRunner, SystemGit};
use crate::identity::{absolute_path, project_id, ProjectId, WorkspaceName};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A workspace with its resolved metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub project_id: ProjectId,
    /// Same as `branch`
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub metadata: WorkspaceMetadata,
}

impl Workspace {
    pub fn workspace_ref(&self) -> WorkspaceRef {
        WorkspaceRef {
            project_id: self.project_id.clone(),
            workspace_name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

/// Lightweight identity of a workspace. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRef {
    pub project_id: ProjectId,
    pub workspace_name: String,
    pub path: PathBuf,
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorktreeEntry {
    path: PathBuf,
    branch: Option<String>,
    bare: bool,
    prunable: bool,
}

fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
                bare: false,
                prunable: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(reference) = line.strip_prefix("branch ") {
            entry.branch = Some(
                reference
                    .strip_prefix("refs/heads/")
                    .unwrap_or(reference)
                    .to_string(),
            );
        } else if line == "bare" {
            entry.bare = true;
        } else if line == "prunable" || line.starts_with("prunable ") {
            entry.prunable = true;
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

/// Discovers, creates and removes the worktrees of one repository.
pub struct WorktreeProvider<G: GitRunner + Clone = SystemGit> {
    repo: PathBuf,
    project_id: ProjectId,
    workspaces_dir: PathBuf,
    git: G,
    metadata: MetadataStore<G>,
}

impl WorktreeProvider<SystemGit> {
    /// Provider for `repo` using the system git. New worktrees are created
    /// under `workspaces_dir`.
    pub fn new(repo: impl AsRef<Path>, workspaces_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_git(repo, workspaces_dir, SystemGit::new())
    }
}

impl<G: GitRunner + Clone> WorktreeProvider<G> {
    pub fn with_git(repo: impl AsRef<Path>, workspaces_dir: impl AsRef<Path>, git: G) -> Result<Self> {
        let repo = absolute_path(repo)?;
        let workspaces_dir = absolute_path(workspaces_dir)?;
        Ok(Self {
            project_id: project_id(&repo),
            repo,
            workspaces_dir,
            metadata: MetadataStore::new(git.clone()),
            git,
        })
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo
    }

    /// Directory a workspace with this name is (or would be) created in.
    pub fn workspace_path(&self, name: &WorkspaceName) -> PathBuf {
        self.workspaces_dir.join(name.as_str())
    }

    /// Enumerate the repository's branch-bound linked worktrees.
    ///
    /// The primary checkout, bare entries, detached worktrees and prunable
    /// entries are skipped. Missing metadata never fails discovery.
    pub async fn discover(&self) -> Result<Vec<Workspace>> {
        let listing = run_checked(&self.git, &self.repo, &["worktree", "list", "--porcelain"]).await?;
        let mut workspaces = Vec::new();

        // The first entry is always the primary worktree
        for entry in parse_worktree_list(&listing).into_iter().skip(1) {
            if entry.bare || entry.prunable {
                debug!(path = %entry.path.display(), "skipping bare/prunable worktree");
                continue;
            }
            let Some(branch) = entry.branch else {
                debug!(path = %entry.path.display(), "skipping detached worktree");
                continue;
            };

            let stored = match self.metadata.read_all(&self.repo, &branch).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(branch = %branch, error = %e, "could not read workspace metadata");
                    BTreeMap::new()
                }
            };

            workspaces.push(Workspace {
                project_id: self.project_id.clone(),
                name: branch.clone(),
                path: entry.path,
                metadata: WorkspaceMetadata::resolve(&branch, stored),
                branch,
            });
        }

        Ok(workspaces)
    }

    /// Create a branch `name` from `base_branch` and a worktree for it.
    ///
    /// `base` is recorded before returning. If that write fails the
    /// worktree and branch are removed again.
    pub async fn create_workspace(&self, name: &WorkspaceName, base_branch: &str) -> Result<Workspace> {
        let path = self.workspace_path(name);
        if tokio::fs::try_exists(&path).await? {
            return Err(Error::AlreadyExists(format!(
                "workspace directory {} already exists",
                path.display()
            )));
        }
        if self.branch_exists(name.as_str()).await? {
            return Err(Error::AlreadyExists(format!("branch {} already exists", name)));
        }

        let base_commit = format!("{}^{{commit}}", base_branch);
        let base_check = self
            .git
            .run(&self.repo, &["rev-parse", "--verify", "--quiet", &base_commit])
            .await?;
        if !base_check.success() {
            return Err(Error::NotFound(format!("base branch {}", base_branch)));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path_arg = path.to_string_lossy().into_owned();
        run_checked(
            &self.git,
            &self.repo,
            &["worktree", "add", "-b", name.as_str(), &path_arg, base_branch],
        )
        .await?;

        let base_key = MetadataKey::parse(BASE_KEY)?;
        if let Err(e) = self
            .metadata
            .write(&self.repo, name.as_str(), &base_key, Some(base_branch))
            .await
        {
            warn!(workspace = %name, error = %e, "recording base failed, rolling back");
            self.discard(name.as_str(), &path).await;
            return Err(e);
        }

        info!(workspace = %name, base = base_branch, path = %path.display(), "workspace created");
        Ok(Workspace {
            project_id: self.project_id.clone(),
            name: name.to_string(),
            path,
            branch: name.to_string(),
            metadata: WorkspaceMetadata::resolve(
                name.as_str(),
                BTreeMap::from([(BASE_KEY.to_string(), base_branch.to_string())]),
            ),
        })
    }

    /// Remove a workspace's worktree, branch and metadata.
    pub async fn remove_workspace(&self, target: &WorkspaceRef) -> Result<()> {
        if target.project_id != self.project_id {
            return Err(Error::NotFound(format!(
                "workspace {} does not belong to project {}",
                target.workspace_name, self.project_id
            )));
        }

        let path_arg = target.path.to_string_lossy().into_owned();
        run_checked(
            &self.git,
            &self.repo,
            &["worktree", "remove", "--force", &path_arg],
        )
        .await?;

        if self.branch_exists(&target.workspace_name).await? {
            run_checked(
                &self.git,
                &self.repo,
                &["branch", "-D", &target.workspace_name],
            )
            .await?;
        }
        self.metadata
            .remove_all(&self.repo, &target.workspace_name)
            .await?;

        info!(workspace = %target.workspace_name, "workspace removed");
        Ok(())
    }

    /// Set (`Some`) or delete (`None`) one metadata key on the workspace
    /// checked out at `path`. The key is validated before anything is
    /// written.
    pub async fn set_metadata(&self, path: &Path, key: &str, value: Option<&str>) -> Result<()> {
        let key = MetadataKey::parse(key)?;
        let branch = self.branch_of(path).await?;
        self.metadata.write(&self.repo, &branch, &key, value).await
    }

    /// Metadata of the workspace checked out at `path`, with `base`
    /// falling back to the branch name.
    ///
    /// Keys come back lowercased, as git stores variable names: a value
    /// written under `Owner2` is reported as `owner2`. Use
    /// [`WorkspaceMetadata::get`] for lookups by the original spelling.
    pub async fn get_metadata(&self, path: &Path) -> Result<WorkspaceMetadata> {
        let branch = self.branch_of(path).await?;
        let stored = self.metadata.read_all(&self.repo, &branch).await?;
        Ok(WorkspaceMetadata::resolve(&branch, stored))
    }

    async fn branch_of(&self, path: &Path) -> Result<String> {
        if !tokio::fs::try_exists(path).await? {
            return Err(Error::NotFound(format!("workspace path {}", path.display())));
        }
        let output = self
            .git
            .run(path, &["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await?;
        if !output.success() {
            return Err(Error::NotFound(format!(
                "no branch checked out at {}",
                path.display()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{}", branch);
        let output = self
            .git
            .run(&self.repo, &["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.success())
    }

    /// Best-effort cleanup of a half-created workspace.
    async fn discard(&self, branch: &str, path: &Path) {
        let path_arg = path.to_string_lossy().into_owned();
        for args in [
            vec!["worktree", "remove", "--force", path_arg.as_str()],
            vec!["branch", "-D", branch],
        ] {
            if let Err(e) = run_checked(&self.git, &self.repo, &args).await {
                warn!(error = %e, "rollback step failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepo;

    fn provider(repo: &TestRepo) -> WorktreeProvider {
        WorktreeProvider::new(repo.path(), repo.data_path().join("workspaces")).unwrap()
    }

    fn name(s: &str) -> WorkspaceName {
        WorkspaceName::parse(s).unwrap()
    }

    #[test]
    fn test_parse_worktree_list() {
        let output = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\n\
                      worktree /ws/feature/a\nHEAD def\nbranch refs/heads/feature/a\n\n\
                      worktree /ws/detached\nHEAD 123\ndetached\n\n\
                      worktree /ws/gone\nHEAD 456\nbranch refs/heads/gone\nprunable gitdir file points to non-existent location\n";
        let entries = parse_worktree_list(output);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].path, PathBuf::from("/ws/feature/a"));
        assert_eq!(entries[1].branch.as_deref(), Some("feature/a"));
        assert_eq!(entries[2].branch, None);
        assert!(entries[3].prunable);
    }

    #[tokio::test]
    async fn test_create_and_discover() {
        let repo = TestRepo::new();
        let provider = provider(&repo);

        let created = provider
            .create_workspace(&name("feature/login"), "main")
            .await
            .unwrap();
        assert_eq!(created.branch, "feature/login");
        assert_eq!(created.metadata.base, "main");
        assert!(created.path.ends_with("feature/login"));
        assert!(created.path.join(".git").exists());

        let found = provider.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "feature/login");
        assert_eq!(found[0].metadata.base, "main");
        assert_eq!(found[0].workspace_ref(), created.workspace_ref());
    }

    #[tokio::test]
    async fn test_create_collision_is_already_exists() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        provider.create_workspace(&name("dup"), "main").await.unwrap();

        let err = provider.create_workspace(&name("dup"), "main").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        // An existing branch without a worktree also collides
        repo.git(&["branch", "taken"]);
        let err = provider.create_workspace(&name("taken"), "main").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_create_from_missing_base() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let err = provider
            .create_workspace(&name("orphan"), "no-such-branch")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!provider.workspace_path(&name("orphan")).exists());
    }

    #[tokio::test]
    async fn test_legacy_workspace_base_falls_back_to_branch() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let legacy_path = repo.data_path().join("legacy");
        repo.git(&[
            "worktree",
            "add",
            "-b",
            "legacy",
            legacy_path.to_str().unwrap(),
            "main",
        ]);

        let found = provider.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.base, "legacy");

        let metadata = provider.get_metadata(&legacy_path).await.unwrap();
        assert_eq!(metadata.base, "legacy");
        assert!(metadata.extras.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let ws = provider.create_workspace(&name("meta"), "main").await.unwrap();

        provider
            .set_metadata(&ws.path, "issue-url", Some("https://example.com/42"))
            .await
            .unwrap();
        let metadata = provider.get_metadata(&ws.path).await.unwrap();
        assert_eq!(metadata.get("issue-url"), Some("https://example.com/42"));
        assert_eq!(metadata.base, "main");

        provider.set_metadata(&ws.path, "issue-url", Some("v2")).await.unwrap();
        assert_eq!(
            provider.get_metadata(&ws.path).await.unwrap().get("issue-url"),
            Some("v2")
        );

        provider.set_metadata(&ws.path, "issue-url", None).await.unwrap();
        assert_eq!(
            provider.get_metadata(&ws.path).await.unwrap().get("issue-url"),
            None
        );
    }

    #[tokio::test]
    async fn test_mixed_case_key_reads_back_lowercase() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let ws = provider.create_workspace(&name("casing"), "main").await.unwrap();

        provider.set_metadata(&ws.path, "Owner2", Some("sam")).await.unwrap();
        let metadata = provider.get_metadata(&ws.path).await.unwrap();
        assert_eq!(
            metadata.extras,
            BTreeMap::from([("owner2".to_string(), "sam".to_string())])
        );
        assert_eq!(metadata.get("Owner2"), Some("sam"));

        // Same key in another spelling overwrites rather than duplicating
        provider.set_metadata(&ws.path, "OWNER2", Some("alex")).await.unwrap();
        let metadata = provider.get_metadata(&ws.path).await.unwrap();
        assert_eq!(metadata.extras.len(), 1);
        assert_eq!(metadata.get("owner2"), Some("alex"));
    }

    #[tokio::test]
    async fn test_invalid_key_writes_nothing() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let ws = provider.create_workspace(&name("keys"), "main").await.unwrap();

        let err = provider
            .set_metadata(&ws.path, "bad_key", Some("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMetadataKey(_)));
        assert!(provider.get_metadata(&ws.path).await.unwrap().extras.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_distinct_keys() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let ws = provider.create_workspace(&name("busy"), "main").await.unwrap();

        let (a, b, c) = tokio::join!(
            provider.set_metadata(&ws.path, "owner", Some("sam")),
            provider.set_metadata(&ws.path, "ticket", Some("T-1")),
            provider.set_metadata(&ws.path, "status", Some("review")),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let metadata = provider.get_metadata(&ws.path).await.unwrap();
        assert_eq!(metadata.get("owner"), Some("sam"));
        assert_eq!(metadata.get("ticket"), Some("T-1"));
        assert_eq!(metadata.get("status"), Some("review"));
    }

    #[tokio::test]
    async fn test_remove_workspace() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let ws = provider.create_workspace(&name("doomed"), "main").await.unwrap();
        provider.set_metadata(&ws.path, "owner", Some("sam")).await.unwrap();

        provider.remove_workspace(&ws.workspace_ref()).await.unwrap();

        assert!(!ws.path.exists());
        assert!(provider.discover().await.unwrap().is_empty());
        let branches = repo.git(&["branch", "--list", "doomed"]);
        assert!(branches.is_empty());
        let leftovers = repo.git(&["config", "--list"]);
        assert!(!leftovers.contains("doomed.burrow"));

        // The name is free again
        provider.create_workspace(&name("doomed"), "main").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_foreign_ref_is_not_found() {
        let repo = TestRepo::new();
        let provider = provider(&repo);
        let foreign = WorkspaceRef {
            project_id: project_id("/somewhere/else"),
            workspace_name: "x".to_string(),
            path: PathBuf::from("/somewhere/else/x"),
        };
        assert!(matches!(
            provider.remove_workspace(&foreign).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_workspace_ref_equality_is_structural() {
        let a = WorkspaceRef {
            project_id: project_id("/r"),
            workspace_name: "w".to_string(),
            path: PathBuf::from("/ws/w"),
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.path = PathBuf::from("/ws/other");
        assert_ne!(a, b);
    }
}
