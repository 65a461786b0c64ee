//! Common test utilities for burrow integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/burrow/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with isolated data storage.
///
/// Each `TestEnv` creates two temporary directories:
/// - `repo_dir`: working directory, optionally a git repository
/// - `data_dir`: burrow's data (via `BURROW_DATA_DIR`)
///
/// `burrow()` sets every burrow variable per invocation, so tests stay
/// parallel-safe and ignore the developer's own configuration.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub data_dir: TempDir,
    repo_root: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        let repo_dir = TempDir::new().unwrap();
        // git reports canonical paths; macOS temp dirs live behind a symlink
        let repo_root = repo_dir.path().canonicalize().unwrap();
        Self {
            repo_dir,
            data_dir: TempDir::new().unwrap(),
            repo_root,
        }
    }

    /// Create a new test environment whose repo dir is a git repository
    /// with one commit on `main`.
    pub fn with_git() -> Self {
        let env = Self::new();
        env.git(&["init", "-q"]);
        env.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(env.repo_path().join("README.md"), "test\n").unwrap();
        env.git(&["add", "README.md"]);
        env.git(&[
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=Test",
            "-c",
            "commit.gpgsign=false",
            "commit",
            "-q",
            "-m",
            "initial",
        ]);
        env
    }

    /// Get a Command for the burrow binary with isolated data directory.
    pub fn burrow(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_burrow"));
        cmd.current_dir(self.repo_path());
        cmd.env("BURROW_DATA_DIR", self.data_dir.path());
        cmd.env("BURROW_CONFIG", self.data_dir.path().join("config.kdl"));
        cmd.env_remove("BURROW_INSTALL_MODE");
        cmd.env_remove("BURROW_PORTS_FILE");
        cmd.env_remove("BURROW_AGENT_BIN");
        cmd.env_remove("BURROW_LOG");
        cmd
    }

    /// Run git in the repo dir, returning trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(self.repo_path())
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

    /// Canonical path of the repo directory.
    pub fn repo_path(&self) -> &Path {
        &self.repo_root
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    /// Write `config.kdl` in the data directory.
    pub fn write_config(&self, content: &str) {
        std::fs::write(self.data_path().join("config.kdl"), content).unwrap();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn parse_json(stdout: &[u8]) -> serde_json::Value {
    serde_json::from_slice(stdout).unwrap()
}
