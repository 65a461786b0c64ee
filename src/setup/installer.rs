//! The real installer: downloads release archives and drives the editor CLI.

use super::manifest::{ComponentManifest, ManagedBinary, ManagedExtension};
use super::orchestrator::Installer;
use super::preflight::ComponentInspector;
use crate::fsutil::write_atomic;
use crate::session::script::{self, AttachScript};
use crate::{Error, Result};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("burrow/", env!("CARGO_PKG_VERSION"));

/// How long a `--version` probe may take before the binary counts as absent.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SystemInstaller {
    bin_dir: PathBuf,
    editor: String,
    agent_config: PathBuf,
    attach: AttachScript,
}

impl SystemInstaller {
    pub fn new(
        bin_dir: impl Into<PathBuf>,
        editor: impl Into<String>,
        agent_config: impl Into<PathBuf>,
        attach: AttachScript,
    ) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            editor: editor.into(),
            agent_config: agent_config.into(),
            attach,
        }
    }

    pub fn binary_path(&self, binary: &ManagedBinary) -> PathBuf {
        self.bin_dir.join(binary.file_name())
    }

    async fn editor(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.editor)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Other(format!("failed to run {}: {}", self.editor, e)))?;
        if !output.status.success() {
            return Err(Error::Other(format!(
                "{} {} failed: {}",
                self.editor,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ComponentInspector for SystemInstaller {
    async fn binary_version(&self, binary: &ManagedBinary) -> Result<Option<String>> {
        let path = self.binary_path(binary);
        if !path.is_file() {
            return Ok(None);
        }

        let probe = Command::new(&path)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!(path = %path.display(), status = ?output.status, "version probe failed");
                return Ok(None);
            }
            Ok(Err(e)) => {
                debug!(path = %path.display(), error = %e, "version probe could not run");
                return Ok(None);
            }
            Err(_) => {
                debug!(path = %path.display(), "version probe timed out");
                return Ok(None);
            }
        };
        Ok(parse_version(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn extension_versions(&self) -> Result<BTreeMap<String, String>> {
        let listing = self
            .editor(&["--list-extensions", "--show-versions"])
            .await?;
        Ok(parse_extension_list(&listing))
    }
}

impl Installer for SystemInstaller {
    async fn install_binary(&self, binary: &ManagedBinary) -> Result<()> {
        let url = binary
            .download_url()
            .ok_or_else(|| Error::Download(format!("no download URL for {}", binary.name)))?;
        let file_name = binary.file_name();
        info!(binary = %binary.name, version = %binary.version, %url, "downloading");

        let bytes = tokio::task::spawn_blocking(move || fetch(&url, &file_name))
            .await
            .map_err(|e| Error::Other(format!("download task failed: {e}")))??;

        let path = self.binary_path(binary);
        write_atomic(&path, bytes).await?;
        make_executable(&path).await?;
        debug!(path = %path.display(), "binary installed");
        Ok(())
    }

    async fn install_extension(&self, extension: &ManagedExtension) -> Result<()> {
        let spec = format!("{}@{}", extension.id, extension.version);
        self.editor(&["--install-extension", &spec, "--force"]).await?;
        debug!(extension = %spec, "extension installed");
        Ok(())
    }

    async fn write_config(&self, _manifest: &ComponentManifest) -> Result<()> {
        let config = serde_json::json!({
            "$schema": "https://opencode.ai/config.json",
            "autoupdate": false,
        });
        write_atomic(&self.agent_config, serde_json::to_vec_pretty(&config)?).await?;
        script::install(&self.bin_dir, &self.attach).await?;
        Ok(())
    }
}

/// Download `url` and return the executable named `file_name`.
///
/// Gzipped tarballs are unpacked; any other payload is taken as the binary
/// itself.
fn fetch(url: &str, file_name: &str) -> Result<Vec<u8>> {
    let response = match ureq::get(url).set("User-Agent", USER_AGENT).call() {
        Ok(resp) => resp,
        Err(ureq::Error::Status(code, _)) => {
            return Err(Error::Download(format!("HTTP {code} from {url}")));
        }
        Err(e) => return Err(Error::Download(e.to_string())),
    };

    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| Error::Download(e.to_string()))?;

    if url.ends_with(".tar.gz") || url.ends_with(".tgz") {
        extract_from_tarball(&body, file_name)
    } else {
        Ok(body)
    }
}

fn extract_from_tarball(bytes: &[u8], file_name: &str) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let matches = entry
            .path()?
            .file_name()
            .is_some_and(|name| name == file_name);
        if matches && entry.header().entry_type().is_file() {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }
    Err(Error::Download(format!("archive does not contain {file_name}")))
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// First token that looks like a version number, without a leading `v`.
fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|token| token.trim_start_matches('v'))
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Parse `publisher.name@version` lines from the editor CLI.
fn parse_extension_list(listing: &str) -> BTreeMap<String, String> {
    listing
        .lines()
        .filter_map(|line| line.trim().rsplit_once('@'))
        .filter(|(id, version)| !id.is_empty() && !version.is_empty())
        .map(|(id, version)| (id.to_ascii_lowercase(), version.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn installer(temp: &TempDir) -> SystemInstaller {
        let data = temp.path();
        SystemInstaller::new(
            data.join("bin"),
            "burrow-test-no-such-editor",
            data.join("agent/opencode.json"),
            AttachScript {
                resolver_bin: PathBuf::from("/usr/local/bin/burrow"),
                ports_file: data.join("ports.json"),
                agent_bin: data.join("bin/opencode"),
            },
        )
    }

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("0.15.8\n"), Some("0.15.8".into()));
        assert_eq!(parse_version("opencode v1.2.3"), Some("1.2.3".into()));
        assert_eq!(parse_version("no version here"), None);
    }

    #[test]
    fn test_parse_extension_list() {
        let parsed = parse_extension_list("Pub.Alpha@1.0.0\n\npub.beta@2.1.0\nbroken\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["pub.alpha"], "1.0.0");
        assert_eq!(parsed["pub.beta"], "2.1.0");
    }

    #[test]
    fn test_extract_from_tarball() {
        let archive = tarball(&[("README.md", &b"docs"[..]), ("dist/opencode", &b"#!bin"[..])]);
        assert_eq!(extract_from_tarball(&archive, "opencode").unwrap(), b"#!bin");
        assert!(matches!(
            extract_from_tarball(&archive, "missing"),
            Err(Error::Download(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_none() {
        let temp = TempDir::new().unwrap();
        let version = installer(&temp)
            .binary_version(&ManagedBinary::new("opencode", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(version, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_binary_version_probe() {
        let temp = TempDir::new().unwrap();
        let installer = installer(&temp);
        let binary = ManagedBinary::new("opencode", "1.0.0");
        let path = installer.binary_path(&binary);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "#!/bin/sh\necho 1.0.0\n").unwrap();
        make_executable(&path).await.unwrap();

        assert_eq!(
            installer.binary_version(&binary).await.unwrap(),
            Some("1.0.0".to_string())
        );
    }

    #[tokio::test]
    async fn test_install_without_url_fails() {
        let temp = TempDir::new().unwrap();
        let err = installer(&temp)
            .install_binary(&ManagedBinary::new("opencode", "1.0.0"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DOWNLOAD_FAILED");
    }

    #[tokio::test]
    async fn test_missing_editor_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(installer(&temp).extension_versions().await.is_err());
    }

    #[tokio::test]
    async fn test_write_config_installs_wrappers() {
        let temp = TempDir::new().unwrap();
        installer(&temp)
            .write_config(&ComponentManifest::default())
            .await
            .unwrap();

        let config: serde_json::Value = serde_json::from_slice(
            &std::fs::read(temp.path().join("agent/opencode.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(config["autoupdate"], false);
        assert!(temp.path().join("bin/oc").exists());
        assert!(temp.path().join("bin/oc.cmd").exists());
    }
}
