//! Branch-scoped workspace metadata stored in the repository's git config.
//!
//! Each key lives at `branch.<branch>.burrow.<key>`, so metadata travels
//! with the branch, survives restarts, and needs no side database. Every
//! key is its own config entry; concurrent writes to different keys only
//! contend on git's `config.lock`, which is retried.

use crate::git::{GitOutput, GitRunner};
use crate::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Vendor namespace segment in metadata config keys.
pub const METADATA_NAMESPACE: &str = "burrow";

/// Metadata key recording the branch a workspace was created from.
pub const BASE_KEY: &str = "base";

const LOCK_RETRY_ATTEMPTS: u32 = 40;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(15);

/// git exits with 5 when asked to unset a key that isn't there.
const GIT_CONFIG_NO_SUCH_KEY: i32 = 5;

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9-]*[A-Za-z0-9]$").expect("metadata key pattern is valid")
});

/// A validated metadata key: a letter, then letters/digits/hyphens, not
/// ending in a hyphen. Underscores are not allowed because git rejects them
/// in variable names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataKey(String);

impl MetadataKey {
    pub fn parse(key: &str) -> Result<Self> {
        if KEY_PATTERN.is_match(key) {
            Ok(Self(key.to_string()))
        } else {
            Err(Error::InvalidMetadataKey(format!(
                "{:?} must match ^[A-Za-z][A-Za-z0-9-]*[A-Za-z0-9]$",
                key
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved metadata for one workspace.
///
/// `base` always has a value. Extra keys are reported in git's canonical
/// lowercase form; use [`WorkspaceMetadata::get`] for case-insensitive
/// lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceMetadata {
    pub base: String,
    #[serde(flatten)]
    pub extras: BTreeMap<String, String>,
}

impl WorkspaceMetadata {
    /// Build metadata from stored entries.
    ///
    /// Workspaces created before metadata existed have no stored `base`;
    /// their base is their own branch name.
    pub fn resolve(branch: &str, mut stored: BTreeMap<String, String>) -> Self {
        let base = stored
            .remove(BASE_KEY)
            .unwrap_or_else(|| branch.to_string());
        Self {
            base,
            extras: stored,
        }
    }

    /// Look up a key, `base` included. Keys compare case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        if key == BASE_KEY {
            return Some(&self.base);
        }
        self.extras.get(&key).map(String::as_str)
    }
}

fn config_key(branch: &str, key: &str) -> String {
    format!("branch.{}.{}.{}", branch, METADATA_NAMESPACE, key)
}

fn is_lock_contention(output: &GitOutput) -> bool {
    output.stderr.contains("could not lock config file")
        || output.stderr.contains("config.lock")
}

/// Reads and writes branch-scoped metadata through git config.
#[derive(Debug, Clone)]
pub struct MetadataStore<G: GitRunner> {
    git: G,
}

impl<G: GitRunner> MetadataStore<G> {
    pub fn new(git: G) -> Self {
        Self { git }
    }

    /// All stored metadata entries for `branch`, keyed by lowercase key.
    pub async fn read_all(&self, repo: &Path, branch: &str) -> Result<BTreeMap<String, String>> {
        let pattern = format!(
            "^{}",
            escape_ere(&format!("branch.{}.{}.", branch, METADATA_NAMESPACE))
        );
        let output = self
            .git
            .run(repo, &["config", "-z", "--get-regexp", &pattern])
            .await?;

        // Exit 1 means no matching entries
        if output.status == Some(1) {
            return Ok(BTreeMap::new());
        }
        if !output.success() {
            return Err(Error::Git {
                command: format!("config --get-regexp {}", pattern),
                stderr: output.stderr.trim().to_string(),
            });
        }

        let prefix = format!("branch.{}.{}.", branch, METADATA_NAMESPACE);
        Ok(parse_config_entries(&output.stdout, &prefix))
    }

    /// Write one key. `None` deletes it; deleting an absent key succeeds.
    pub async fn write(
        &self,
        repo: &Path,
        branch: &str,
        key: &MetadataKey,
        value: Option<&str>,
    ) -> Result<()> {
        let full_key = config_key(branch, key.as_str());
        match value {
            Some(value) => {
                self.config_with_retry(repo, &["config", &full_key, value], &[])
                    .await?
            }
            None => {
                self.config_with_retry(
                    repo,
                    &["config", "--unset-all", &full_key],
                    &[GIT_CONFIG_NO_SUCH_KEY],
                )
                .await?
            }
        }
        debug!(branch, key = %key, deleted = value.is_none(), "metadata written");
        Ok(())
    }

    /// Drop every metadata entry for `branch`.
    pub async fn remove_all(&self, repo: &Path, branch: &str) -> Result<()> {
        let section = format!("branch.{}.{}", branch, METADATA_NAMESPACE);
        match self
            .config_with_retry(repo, &["config", "--remove-section", &section], &[])
            .await
        {
            Ok(()) => Ok(()),
            Err(Error::Git { stderr, .. }) if stderr.contains("no such section") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run a git config mutation, retrying while another writer holds
    /// `config.lock`. Exit codes in `tolerated` count as success.
    async fn config_with_retry(&self, repo: &Path, args: &[&str], tolerated: &[i32]) -> Result<()> {
        let mut attempt = 0;
        loop {
            let output = self.git.run(repo, args).await?;
            if output.success() || output.status.is_some_and(|code| tolerated.contains(&code)) {
                return Ok(());
            }
            attempt += 1;
            if is_lock_contention(&output) && attempt < LOCK_RETRY_ATTEMPTS {
                debug!(attempt, "git config locked, retrying");
                tokio::time::sleep(LOCK_RETRY_DELAY * attempt.min(5)).await;
                continue;
            }
            if is_lock_contention(&output) {
                warn!(?args, "gave up waiting for git config lock");
            }
            return Err(Error::Git {
                command: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            });
        }
    }
}

/// Escape POSIX extended-regex metacharacters for `git config --get-regexp`.
fn escape_ere(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len() * 2);
    for ch in input.chars() {
        if matches!(
            ch,
            '.' | '[' | ']' | '{' | '}' | '(' | ')' | '\\' | '*' | '+' | '?' | '^' | '$' | '|'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Parse `git config -z --get-regexp` output (`name\nvalue\0` records).
fn parse_config_entries(stdout: &str, prefix: &str) -> BTreeMap<String, String> {
    let prefix_lower = prefix.to_ascii_lowercase();
    stdout
        .split('\0')
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let (name, value) = record.split_once('\n').unwrap_or((record, ""));
            // git lowercases section and variable names but keeps the
            // subsection (branch) as written
            let key = if name.starts_with(prefix) {
                &name[prefix.len()..]
            } else if name.to_ascii_lowercase().starts_with(&prefix_lower) {
                &name[prefix.len()..]
            } else {
                return None;
            };
            Some((key.to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}
