//! Thin async wrapper around the `git` command line.
//!
//! Burrow never implements version control itself; every repository
//! operation is a `git` subprocess. The [`GitRunner`] trait is the seam
//! that lets callers swap in another runner.

use crate::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one git invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs git commands in a working directory.
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` with `cwd` as the working directory.
    ///
    /// A non-zero exit status is not an error at this level; only failing
    /// to launch git is.
    fn run(&self, cwd: &Path, args: &[&str]) -> impl Future<Output = Result<GitOutput>> + Send;
}

/// The system `git` binary.
#[derive(Debug, Clone)]
pub struct SystemGit {
    program: PathBuf,
}

impl SystemGit {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable instead of the one on `PATH`.
    #[cfg(test)]
    pub(crate) fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new()
    }
}

impl GitRunner for SystemGit {
    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput> {
        debug!(cwd = %cwd.display(), ?args, "git");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Git {
                command: args.join(" "),
                stderr: format!("failed to run {}: {}", self.program.display(), e),
            })?;

        Ok(GitOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run git and require success, returning trimmed stdout.
pub async fn run_checked<G: GitRunner>(git: &G, cwd: &Path, args: &[&str]) -> Result<String> {
    let output = git.run(cwd, args).await?;
    if !output.success() {
        return Err(Error::Git {
            command: args.join(" "),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout.trim().to_string())
}

/// Walk up from `start` to the nearest directory containing a `.git` entry.
///
/// `.git` may be a directory (primary checkout) or a file (linked
/// worktree), so a linked worktree resolves to itself rather than to the
/// repository it was created from.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// The primary checkout of the repository containing `cwd`.
///
/// Unlike [`find_git_root`], a linked worktree resolves to the repository it
/// belongs to.
pub async fn main_repository<G: GitRunner>(git: &G, cwd: &Path) -> Result<PathBuf> {
    let common = run_checked(
        git,
        cwd,
        &["rev-parse", "--path-format=absolute", "--git-common-dir"],
    )
    .await
    .map_err(|_| Error::NotFound(format!("Not in a git repository: {}", cwd.display())))?;
    let common = PathBuf::from(common);
    if common.file_name().is_some_and(|name| name == ".git") {
        if let Some(parent) = common.parent() {
            return Ok(parent.to_path_buf());
        }
    }
    // bare repository
    Ok(common)
}
