//! On-disk record of the last fully successful setup run.
//!
//! Stored as `setup.json` in the data directory:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "configVersion": 1,
//!   "binaries": { "opencode": "0.15.8" },
//!   "extensions": {},
//!   "completedAt": "2026-01-31T09:00:00Z"
//! }
//! ```

use super::manifest::ComponentManifest;
use crate::fsutil::{read_optional, write_atomic};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Current marker schema version. A marker with another version is stale.
pub const MARKER_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMarker {
    pub schema_version: u32,
    pub config_version: u32,
    #[serde(default)]
    pub binaries: BTreeMap<String, String>,
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
    pub completed_at: DateTime<Utc>,
}

impl SetupMarker {
    /// The marker describing a complete install of `manifest`.
    pub fn for_manifest(manifest: &ComponentManifest) -> Self {
        Self {
            schema_version: MARKER_SCHEMA_VERSION,
            config_version: manifest.config_version,
            binaries: manifest
                .binaries
                .iter()
                .map(|b| (b.name.clone(), b.version.clone()))
                .collect(),
            extensions: manifest
                .extensions
                .iter()
                .map(|e| (e.id.to_ascii_lowercase(), e.version.clone()))
                .collect(),
            completed_at: Utc::now(),
        }
    }

    /// Whether the configuration recorded here is current.
    pub fn config_current(&self, manifest: &ComponentManifest) -> bool {
        self.schema_version == MARKER_SCHEMA_VERSION
            && self.config_version == manifest.config_version
    }

    /// True when every managed component is recorded at its expected
    /// version. Extra recorded entries are ignored.
    pub fn matches(&self, manifest: &ComponentManifest) -> bool {
        self.config_current(manifest)
            && manifest
                .binaries
                .iter()
                .all(|b| self.binaries.get(&b.name) == Some(&b.version))
            && manifest.extensions.iter().all(|e| {
                self.extensions.get(&e.id.to_ascii_lowercase()) == Some(&e.version)
            })
    }

    /// Read the marker. Missing or malformed markers read as `None`.
    pub async fn read(path: &Path) -> Option<Self> {
        let bytes = match read_optional(path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read setup marker");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed setup marker");
                None
            }
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, serde_json::to_vec_pretty(self)?).await
    }
}
