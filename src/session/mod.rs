//! Discovery of running agent sessions.
//!
//! The process manager that owns agent processes rewrites `ports.json`
//! whenever one starts or stops:
//!
//! ```json
//! { "workspaces": { "/home/me/repo": { "port": 14001 } } }
//! ```
//!
//! This module only reads it. [`attach`] resolves the current directory to a
//! running agent and [`script`] renders the wrappers terminals invoke.

pub mod attach;
pub mod script;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the port registry inside the data directory.
pub const PORTS_FILE: &str = "ports.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub port: u16,
}

/// Why the registry could not be read.
#[derive(Debug, thiserror::Error)]
pub enum RegistryReadError {
    #[error("port registry not found")]
    Missing,

    #[error("port registry is malformed: {0}")]
    Malformed(String),
}

/// Read-only view of the session port registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRegistry {
    #[serde(default)]
    pub workspaces: BTreeMap<String, PortEntry>,
}

impl PortRegistry {
    /// Read the registry, telling "absent" apart from "unreadable".
    ///
    /// A file caught mid-rewrite simply fails to parse and reads as
    /// [`RegistryReadError::Malformed`].
    pub fn read(path: &Path) -> Result<Self, RegistryReadError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryReadError::Missing);
            }
            Err(e) => return Err(RegistryReadError::Malformed(e.to_string())),
        };
        serde_json::from_slice(&bytes).map_err(|e| RegistryReadError::Malformed(e.to_string()))
    }

    /// Like [`read`](Self::read), but any failure is an empty registry.
    pub fn load_or_empty(path: &Path) -> Self {
        Self::read(path).unwrap_or_else(|e| {
            debug!(path = %path.display(), error = %e, "treating port registry as empty");
            Self::default()
        })
    }

    /// Port of the agent serving `workspace`, by exact path.
    pub fn port_for(&self, workspace: &Path) -> Option<u16> {
        self.workspaces
            .get(workspace.to_string_lossy().as_ref())
            .map(|entry| entry.port)
    }

    /// All `(workspace path, port)` pairs, ordered by path.
    pub fn entries(&self) -> impl Iterator<Item = (PathBuf, u16)> + '_ {
        self.workspaces
            .iter()
            .map(|(path, entry)| (PathBuf::from(path), entry.port))
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}
