//! KDL schema for `config.kdl`.
//!
//! ```kdl
//! data-dir "/home/me/.local/share/burrow"
//! workspaces-dir "/home/me/burrows"
//! install-mode "managed"   // or "external"
//! editor "code"
//! agent-binary "/usr/local/bin/opencode"
//! binary "opencode" version="0.15.8" url="https://example.com/{version}/opencode-{target}.tar.gz"
//! extension "sst-dev.opencode" version="0.0.12"
//! ```
//!
//! Unknown nodes are ignored so newer files keep loading.

use crate::setup::manifest::{ComponentManifest, ManagedBinary, ManagedExtension};
use crate::setup::InstallMode;
use crate::{Error, Result};
use kdl::{KdlDocument, KdlNode};
use std::path::{Path, PathBuf};

/// User configuration. Every field is optional; the resolver fills gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BurrowConfig {
    pub data_dir: Option<PathBuf>,
    pub workspaces_dir: Option<PathBuf>,
    pub install_mode: Option<InstallMode>,
    /// Editor CLI used to install extensions (e.g. "code", "cursor")
    pub editor: Option<String>,
    pub agent_binary: Option<PathBuf>,
    /// Pinned binaries; replace the built-in entry of the same name
    pub binaries: Vec<ManagedBinary>,
    pub extensions: Vec<ManagedExtension>,
}

impl BurrowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        let doc: KdlDocument = content.parse().map_err(|e| {
            Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e))
        })?;
        let config = Self::from_kdl(&doc);
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        for binary in &self.binaries {
            if binary.name.is_empty() || binary.version.is_empty() {
                return Err("binary entries need a name and a version".to_string());
            }
        }
        for extension in &self.extensions {
            if !extension.id.contains('.') || extension.version.is_empty() {
                return Err(format!(
                    "extension '{}' must be publisher.name with a version",
                    extension.id
                ));
            }
        }
        Ok(())
    }

    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        for node in doc.nodes() {
            match node.name().value() {
                "data-dir" => config.data_dir = get_string_arg(node).map(PathBuf::from),
                "workspaces-dir" => config.workspaces_dir = get_string_arg(node).map(PathBuf::from),
                "install-mode" => {
                    config.install_mode = get_string_arg(node).and_then(|s| InstallMode::parse(&s))
                }
                "editor" => config.editor = get_string_arg(node),
                "agent-binary" => config.agent_binary = get_string_arg(node).map(PathBuf::from),
                "binary" => {
                    if let (Some(name), Some(version)) =
                        (get_string_arg(node), get_string_prop(node, "version"))
                    {
                        let mut binary = ManagedBinary::new(name, version);
                        binary.url = get_string_prop(node, "url");
                        config.binaries.push(binary);
                    }
                }
                "extension" => {
                    if let (Some(id), Some(version)) =
                        (get_string_arg(node), get_string_prop(node, "version"))
                    {
                        config.extensions.push(ManagedExtension::new(id, version));
                    }
                }
                _ => {}
            }
        }

        config
    }

    /// The component manifest this configuration asks for: the built-in
    /// agent binary unless overridden, plus configured extras.
    pub fn manifest(&self) -> ComponentManifest {
        let mut manifest = ComponentManifest::default();
        for binary in &self.binaries {
            match manifest.binaries.iter_mut().find(|b| b.name == binary.name) {
                Some(existing) => {
                    existing.version = binary.version.clone();
                    if binary.url.is_some() {
                        existing.url = binary.url.clone();
                    }
                }
                None => manifest.binaries.push(binary.clone()),
            }
        }
        manifest.extensions = self.extensions.clone();
        manifest
    }
}

/// First positional string argument.
fn get_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// String property `key=...`.
fn get_string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}
