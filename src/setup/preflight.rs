//! Decide what, if anything, setup has to (re)install.

use super::manifest::{ComponentManifest, ManagedBinary};
use super::marker::SetupMarker;
use super::PreflightFailureKind;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Queries what is actually installed.
pub trait ComponentInspector: Send + Sync {
    /// Installed version of a managed binary, `None` if it is absent.
    fn binary_version(&self, binary: &ManagedBinary) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Installed editor extensions, id → version.
    fn extension_versions(&self) -> impl Future<Output = Result<BTreeMap<String, String>>> + Send;
}

/// Successful preflight outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    pub needs_setup: bool,
    /// Absent, or present at a different version
    pub missing_binaries: BTreeSet<String>,
    pub missing_extensions: BTreeSet<String>,
    pub outdated_extensions: BTreeSet<String>,
    /// Generated configuration is absent or from an older version
    pub stale_config: bool,
}

impl PreflightReport {
    /// A report saying nothing needs doing.
    pub fn up_to_date() -> Self {
        Self::default()
    }

    /// A report asking for every managed component to be (re)installed.
    pub fn everything(manifest: &ComponentManifest) -> Self {
        Self {
            missing_binaries: manifest.binaries.iter().map(|b| b.name.clone()).collect(),
            missing_extensions: manifest.extensions.iter().map(|e| e.id.clone()).collect(),
            stale_config: true,
            ..Default::default()
        }
        .finish()
    }

    fn finish(mut self) -> Self {
        self.needs_setup = self.stale_config
            || !self.missing_binaries.is_empty()
            || !self.missing_extensions.is_empty()
            || !self.outdated_extensions.is_empty();
        self
    }
}

/// Compares the setup marker and installed components against the manifest.
pub struct PreflightChecker<I> {
    manifest: Arc<ComponentManifest>,
    marker_path: PathBuf,
    inspector: I,
}

impl<I: ComponentInspector> PreflightChecker<I> {
    pub fn new(manifest: Arc<ComponentManifest>, marker_path: impl Into<PathBuf>, inspector: I) -> Self {
        Self {
            manifest,
            marker_path: marker_path.into(),
            inspector,
        }
    }

    pub fn manifest(&self) -> &ComponentManifest {
        &self.manifest
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    /// Run the check.
    ///
    /// A marker that matches every managed component short-circuits to "no
    /// setup needed". Otherwise each component is probed so setup can be
    /// selective.
    pub async fn check(&self) -> Result<PreflightReport> {
        let marker = SetupMarker::read(&self.marker_path).await;
        if marker.as_ref().is_some_and(|m| m.matches(&self.manifest)) {
            debug!("setup marker is current");
            return Ok(PreflightReport::up_to_date());
        }

        let mut report = PreflightReport {
            stale_config: !marker
                .as_ref()
                .is_some_and(|m| m.config_current(&self.manifest)),
            ..Default::default()
        };

        for binary in &self.manifest.binaries {
            let installed = self
                .inspector
                .binary_version(binary)
                .await
                .map_err(|e| Error::PreflightFailed {
                    kind: PreflightFailureKind::BinaryProbe,
                    message: format!("{}: {}", binary.name, e),
                })?;
            if installed.as_deref() != Some(binary.version.as_str()) {
                debug!(binary = %binary.name, ?installed, expected = %binary.version, "binary needs install");
                report.missing_binaries.insert(binary.name.clone());
            }
        }

        if !self.manifest.extensions.is_empty() {
            let installed: BTreeMap<String, String> = self
                .inspector
                .extension_versions()
                .await
                .map_err(|e| Error::PreflightFailed {
                    kind: PreflightFailureKind::ExtensionProbe,
                    message: e.to_string(),
                })?
                .into_iter()
                .map(|(id, version)| (id.to_ascii_lowercase(), version))
                .collect();

            for extension in &self.manifest.extensions {
                match installed.get(&extension.id.to_ascii_lowercase()) {
                    None => {
                        report.missing_extensions.insert(extension.id.clone());
                    }
                    Some(version) if *version != extension.version => {
                        report.outdated_extensions.insert(extension.id.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(report.finish())
    }
}
