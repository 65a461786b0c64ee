//! Burrow - disposable git-worktree workspaces paired with local agents.
//!
//! This library provides the core functionality for the `burrow` CLI tool:
//! workspace identity, git-backed workspace metadata, the project registry,
//! setup/preflight orchestration, and managed-session discovery.

pub mod cli;
pub mod commands;
pub mod config;
pub mod fsutil;
pub mod git;
pub mod identity;
pub mod project;
pub mod session;
pub mod setup;
pub mod workspace;

use setup::{PreflightFailureKind, SetupStep};

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;

    /// A throwaway git repository with one commit on `main`, plus an
    /// isolated data directory.
    pub struct TestRepo {
        /// Keeps the repository directory alive
        pub repo_dir: TempDir,
        /// Isolated data storage directory
        pub data_dir: TempDir,
        root: PathBuf,
        data_root: PathBuf,
    }

    impl TestRepo {
        pub fn new() -> Self {
            let repo_dir = TempDir::new().unwrap();
            let data_dir = TempDir::new().unwrap();
            // git reports canonical paths; macOS temp dirs live behind a symlink
            let root = repo_dir.path().canonicalize().unwrap();
            let data_root = data_dir.path().canonicalize().unwrap();
            let repo = Self {
                repo_dir,
                data_dir,
                root,
                data_root,
            };
            repo.git(&["init", "-q"]);
            repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
            repo.git(&[
                "-c",
                "user.email=test@example.com",
                "-c",
                "user.name=Test",
                "-c",
                "commit.gpgsign=false",
                "commit",
                "-q",
                "--allow-empty",
                "-m",
                "initial",
            ]);
            repo
        }

        /// Canonical path of the repository root.
        pub fn path(&self) -> &Path {
            &self.root
        }

        /// Path of the isolated data directory.
        pub fn data_path(&self) -> &Path {
            &self.data_root
        }

        /// Run git synchronously in the repository and return trimmed stdout.
        pub fn git(&self, args: &[&str]) -> String {
            let output = Command::new("git")
                .args(args)
                .current_dir(&self.root)
                .output()
                .unwrap();
            assert!(
                output.status.success(),
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            );
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
    }

    impl Default for TestRepo {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Library-level error type for Burrow operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid workspace name: {0}")]
    InvalidName(String),

    #[error("Path is not absolute: {0}")]
    NotAbsolute(String),

    #[error("Invalid metadata key: {0}")]
    InvalidMetadataKey(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Preflight check failed ({kind}): {message}")]
    PreflightFailed {
        kind: PreflightFailureKind,
        message: String,
    },

    #[error("Setup is already in progress")]
    SetupInProgress,

    #[error("Setup failed during {step}: {message}")]
    SetupFailed { step: SetupStep, message: String },

    #[error("Failed to start services: {0}")]
    ServiceStart(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::InvalidName(_) => "INVALID_NAME",
            Error::NotAbsolute(_) => "NOT_ABSOLUTE",
            Error::InvalidMetadataKey(_) => "INVALID_METADATA_KEY",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Git { .. } => "GIT_ERROR",
            Error::PreflightFailed { .. } => "PREFLIGHT_FAILED",
            Error::SetupInProgress => "SETUP_IN_PROGRESS",
            Error::SetupFailed { .. } => "SETUP_FAILED",
            Error::ServiceStart(_) => "SERVICE_START_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Download(_) => "DOWNLOAD_FAILED",
            Error::Other(_) => "ERROR",
        }
    }
}

/// Result type alias for Burrow operations.
pub type Result<T> = std::result::Result<T, Error>;
