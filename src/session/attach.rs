//! Attach a terminal to the agent serving the current workspace.
//!
//! Invoked by the generated `oc` wrappers. Every decision is driven by the
//! working directory: find the enclosing repository root, look it up in the
//! port registry, then hand the terminal over to `opencode attach`.

use super::{PortRegistry, RegistryReadError};
use crate::git::find_git_root;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Overrides the port registry location.
pub const PORTS_FILE_ENV: &str = "BURROW_PORTS_FILE";

/// Overrides the agent binary used for attaching.
pub const AGENT_BIN_ENV: &str = "BURROW_AGENT_BIN";

/// Exit code for every resolution failure.
pub const RESOLUTION_FAILURE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("Not in a git repository")]
    NotInRepository,

    #[error("No opencode servers are running")]
    NoServers,

    #[error("Failed to read ports.json")]
    RegistryUnreadable,

    #[error(
        "No opencode server found for workspace: {}\nOpen this workspace in burrow to start its server.",
        .0.display()
    )]
    NoServerForWorkspace(PathBuf),

    #[error("Failed to start opencode: {0}")]
    Launch(String),
}

/// A running agent to attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    pub root: PathBuf,
    pub port: u16,
}

impl AttachTarget {
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Find the agent responsible for `cwd`.
pub fn resolve(cwd: &Path, ports_file: &Path) -> Result<AttachTarget, AttachError> {
    let root = find_git_root(cwd).ok_or(AttachError::NotInRepository)?;

    let registry = PortRegistry::read(ports_file).map_err(|e| match e {
        RegistryReadError::Missing => AttachError::NoServers,
        RegistryReadError::Malformed(reason) => {
            debug!(path = %ports_file.display(), %reason, "unreadable port registry");
            AttachError::RegistryUnreadable
        }
    })?;

    let port = registry.port_for(&root).or_else(|| {
        root.canonicalize()
            .ok()
            .and_then(|canonical| registry.port_for(&canonical))
    });
    match port {
        Some(port) => Ok(AttachTarget { root, port }),
        None => Err(AttachError::NoServerForWorkspace(root)),
    }
}

/// Replace this process with `<agent> attach <url> [extra…]`.
///
/// Only returns on failure.
#[cfg(unix)]
pub fn launch(agent: &Path, target: &AttachTarget, extra: &[OsString]) -> Result<i32, AttachError> {
    use std::os::unix::process::CommandExt;

    debug!(agent = %agent.display(), url = %target.url(), "exec");
    let err = Command::new(agent)
        .arg("attach")
        .arg(target.url())
        .args(extra)
        .exec();
    Err(AttachError::Launch(err.to_string()))
}

/// Run `<agent> attach <url> [extra…]` and return its exit code.
#[cfg(not(unix))]
pub fn launch(agent: &Path, target: &AttachTarget, extra: &[OsString]) -> Result<i32, AttachError> {
    debug!(agent = %agent.display(), url = %target.url(), "spawn");
    let status = Command::new(agent)
        .arg("attach")
        .arg(target.url())
        .args(extra)
        .status()
        .map_err(|e| AttachError::Launch(e.to_string()))?;
    Ok(status.code().unwrap_or(RESOLUTION_FAILURE))
}

/// Resolve and attach, printing any failure to stderr.
///
/// Returns the process exit code: the agent's own code, or
/// [`RESOLUTION_FAILURE`].
pub fn run(cwd: &Path, ports_file: &Path, agent: &Path, extra: &[OsString]) -> i32 {
    match resolve(cwd, ports_file).and_then(|target| launch(agent, &target, extra)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            RESOLUTION_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        repo: PathBuf,
        ports: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let repo = root.join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::create_dir_all(repo.join("sub/dir")).unwrap();
        Fixture {
            ports: root.join("ports.json"),
            repo,
            _temp: temp,
        }
    }

    fn write_ports(fixture: &Fixture, path: &Path, port: u16) {
        let mut workspaces = serde_json::Map::new();
        workspaces.insert(
            path.to_string_lossy().into_owned(),
            serde_json::json!({ "port": port }),
        );
        let json = serde_json::json!({ "workspaces": workspaces });
        fs::write(&fixture.ports, json.to_string()).unwrap();
    }

    #[test]
    fn test_resolves_from_subdirectory() {
        let fx = fixture();
        write_ports(&fx, &fx.repo, 14001);

        let target = resolve(&fx.repo.join("sub/dir"), &fx.ports).unwrap();
        assert_eq!(target.root, fx.repo);
        assert_eq!(target.port, 14001);
        assert_eq!(target.url(), "http://127.0.0.1:14001");
    }

    #[test]
    fn test_linked_worktree_resolves_to_itself() {
        let fx = fixture();
        let worktree = fx.repo.join("sub");
        fs::write(worktree.join(".git"), "gitdir: ../.git/worktrees/sub\n").unwrap();
        write_ports(&fx, &worktree, 14002);

        let target = resolve(&worktree.join("dir"), &fx.ports).unwrap();
        assert_eq!(target.root, worktree);
        assert_eq!(target.port, 14002);
    }

    #[test]
    fn test_not_in_repository() {
        let fx = fixture();
        let outside = fx.ports.parent().unwrap().join("elsewhere");
        fs::create_dir_all(&outside).unwrap();
        let err = resolve(&outside, &fx.ports).unwrap_err();
        assert!(matches!(err, AttachError::NotInRepository));
        assert_eq!(err.to_string(), "Not in a git repository");
    }

    #[test]
    fn test_registry_failures() {
        let fx = fixture();
        let err = resolve(&fx.repo, &fx.ports).unwrap_err();
        assert_eq!(err.to_string(), "No opencode servers are running");

        fs::write(&fx.ports, "{\"workspaces\": [").unwrap();
        let err = resolve(&fx.repo, &fx.ports).unwrap_err();
        assert_eq!(err.to_string(), "Failed to read ports.json");
    }

    #[test]
    fn test_unknown_workspace() {
        let fx = fixture();
        write_ports(&fx, Path::new("/somewhere/else"), 14001);
        let err = resolve(&fx.repo, &fx.ports).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with(&format!(
            "No opencode server found for workspace: {}",
            fx.repo.display()
        )));
        assert!(message.contains("Open this workspace in burrow"));
    }

    #[test]
    fn test_run_reports_resolution_failure() {
        let fx = fixture();
        let code = run(&fx.repo, &fx.ports, Path::new("opencode"), &[]);
        assert_eq!(code, RESOLUTION_FAILURE);
    }
}
