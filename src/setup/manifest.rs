//! The set of components a complete installation must have.

use serde::Serialize;

/// Default pinned version of the managed agent binary.
pub const DEFAULT_AGENT_VERSION: &str = "0.15.8";

/// Default download location. `{version}` and `{target}` are substituted.
pub const DEFAULT_AGENT_URL: &str =
    "https://github.com/sst/opencode/releases/download/v{version}/opencode-{target}.tar.gz";

/// Name of the managed agent binary.
pub const AGENT_BINARY: &str = "opencode";

/// Bumped whenever the generated configuration or attach scripts change.
pub const CONFIG_VERSION: u32 = 1;

/// A binary burrow downloads into its own bin directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedBinary {
    pub name: String,
    pub version: String,
    /// URL template; `None` means the binary cannot be downloaded
    pub url: Option<String>,
}

impl ManagedBinary {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The download URL for this platform, if a template is configured.
    pub fn download_url(&self) -> Option<String> {
        self.url.as_ref().map(|template| {
            template
                .replace("{version}", &self.version)
                .replace("{target}", platform_target())
        })
    }

    /// File name of the installed executable on this platform.
    pub fn file_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// An editor extension installed through the editor's CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedExtension {
    /// `publisher.name`
    pub id: String,
    pub version: String,
}

impl ManagedExtension {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// Everything setup is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentManifest {
    pub binaries: Vec<ManagedBinary>,
    pub extensions: Vec<ManagedExtension>,
    pub config_version: u32,
}

impl ComponentManifest {
    pub fn binary(&self, name: &str) -> Option<&ManagedBinary> {
        self.binaries.iter().find(|b| b.name == name)
    }

    pub fn extension(&self, id: &str) -> Option<&ManagedExtension> {
        self.extensions
            .iter()
            .find(|e| e.id.eq_ignore_ascii_case(id))
    }
}

impl Default for ComponentManifest {
    fn default() -> Self {
        Self {
            binaries: vec![
                ManagedBinary::new(AGENT_BINARY, DEFAULT_AGENT_VERSION).with_url(DEFAULT_AGENT_URL),
            ],
            extensions: Vec::new(),
            config_version: CONFIG_VERSION,
        }
    }
}

/// Release asset suffix for the running platform, e.g. `linux-x64`.
pub fn platform_target() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "aarch64") => "linux-arm64",
        ("linux", _) => "linux-x64",
        ("macos", "aarch64") => "darwin-arm64",
        ("macos", _) => "darwin-x64",
        ("windows", "aarch64") => "windows-arm64",
        ("windows", _) => "windows-x64",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_url_substitution() {
        let binary = ManagedBinary::new("tool", "1.2.3").with_url("https://x/{version}/tool-{target}.tgz");
        let url = binary.download_url().unwrap();
        assert!(url.starts_with("https://x/1.2.3/tool-"));
        assert!(!url.contains('{'));
    }

    #[test]
    fn test_download_url_absent() {
        assert_eq!(ManagedBinary::new("tool", "1").download_url(), None);
    }

    #[test]
    fn test_default_manifest_has_agent() {
        let manifest = ComponentManifest::default();
        let agent = manifest.binary(AGENT_BINARY).unwrap();
        assert_eq!(agent.version, DEFAULT_AGENT_VERSION);
        assert!(manifest.extensions.is_empty());
    }

    #[test]
    fn test_extension_lookup_ignores_case() {
        let manifest = ComponentManifest {
            extensions: vec![ManagedExtension::new("Pub.Ext", "1.0.0")],
            ..Default::default()
        };
        assert!(manifest.extension("pub.ext").is_some());
    }
}
