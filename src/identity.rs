//! Identity and validation for projects and workspaces.
//!
//! Everything in here is pure: no filesystem access, no subprocesses.
//!
//! - [`project_id`] turns a repository path into a stable `<name>-<hash>` ID
//! - [`WorkspaceName`] validates user-supplied workspace (branch) names
//! - [`absolute_path`] normalizes a path and insists that it is rooted

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Longest sanitized basename kept in a project ID. The hash suffix carries
/// uniqueness, so truncation is safe.
const MAX_BASENAME_LEN: usize = 48;

/// Number of hex characters of the path hash used in a project ID.
const HASH_LEN: usize = 8;

/// Stable identifier for a repository: `<sanitized-basename>-<8 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the project ID for a repository path.
///
/// The path is lexically normalized first, so trailing slashes, doubled
/// separators and `.` segments never change the result. Case is preserved:
/// `/Repo` and `/repo` are different projects.
pub fn project_id(path: impl AsRef<Path>) -> ProjectId {
    let normalized = normalize(path.as_ref());
    let hash = short_hash(&normalized.to_string_lossy());
    ProjectId(format!("{}-{}", sanitize_basename(&normalized), hash))
}

/// Directory name used for a project's on-disk record. Same scheme as
/// [`project_id`].
pub fn dir_name_for(path: impl AsRef<Path>) -> String {
    project_id(path).0
}

/// Human-facing name of a project: the final path segment, unsanitized.
pub fn project_display_name(path: impl AsRef<Path>) -> String {
    normalize(path.as_ref())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
}

/// Sanitize the final segment of `path` for use in an identifier.
///
/// Every run of characters outside `[A-Za-z0-9]` becomes a single `-`,
/// leading and trailing dashes are dropped, and an empty result becomes
/// `root`.
pub fn sanitize_basename(path: &Path) -> String {
    let raw = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut collapsed = String::with_capacity(raw.len());
    let mut in_run = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            collapsed.push(ch);
            in_run = false;
        } else if !in_run {
            collapsed.push('-');
            in_run = true;
        }
    }

    let truncated: String = collapsed
        .trim_start_matches(['-', '.'])
        .chars()
        .take(MAX_BASENAME_LEN)
        .collect();
    let name = truncated.trim_end_matches('-');

    if name.is_empty() {
        "root".to_string()
    } else {
        name.to_string()
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());
    hash_hex[..HASH_LEN].to_string()
}

/// Lexically normalize a path.
///
/// Collapses separator runs, drops `.` segments, and resolves `..` against
/// preceding normal segments. `..` directly under the root is dropped; a
/// leading `..` in a relative path is kept. Symlinks are not consulted.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Normalize `input` and require the result to be absolute.
///
/// Relative inputs always fail, including ones starting with `..`.
pub fn absolute_path(input: impl AsRef<Path>) -> Result<PathBuf> {
    let input = input.as_ref();
    let normalized = normalize(input);
    if !normalized.is_absolute() {
        return Err(Error::NotAbsolute(input.display().to_string()));
    }
    Ok(normalized)
}

/// A validated workspace name. Workspace names double as branch names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceName(String);

impl WorkspaceName {
    pub const MAX_LEN: usize = 100;

    /// Validate a workspace name. Invalid input is rejected, never coerced.
    pub fn parse(input: &str) -> Result<Self> {
        let len = input.chars().count();
        if len == 0 {
            return Err(Error::InvalidName("name must not be empty".to_string()));
        }
        if len > Self::MAX_LEN {
            return Err(Error::InvalidName(format!(
                "name must be at most {} characters, got {}",
                Self::MAX_LEN,
                len
            )));
        }
        if input.starts_with('-') || input.starts_with('.') {
            return Err(Error::InvalidName(format!(
                "name must not start with '-' or '.': {}",
                input
            )));
        }
        if let Some(bad) = input
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')))
        {
            return Err(Error::InvalidName(format!(
                "name contains disallowed character {:?}: {}",
                bad, input
            )));
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for WorkspaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkspaceName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WorkspaceName> for String {
    fn from(name: WorkspaceName) -> Self {
        name.0
    }
}
