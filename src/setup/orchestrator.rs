//! Selective installation driven by a preflight report.

use super::manifest::{ComponentManifest, ManagedBinary, ManagedExtension};
use super::marker::SetupMarker;
use super::preflight::PreflightReport;
use super::{SetupProgress, SetupStep};
use crate::{Error, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Performs the individual installation steps.
pub trait Installer: Send + Sync {
    fn install_binary(&self, binary: &ManagedBinary) -> impl Future<Output = Result<()>> + Send;

    fn install_extension(&self, extension: &ManagedExtension) -> impl Future<Output = Result<()>> + Send;

    /// Write generated configuration (agent config, attach wrappers).
    fn write_config(&self, manifest: &ComponentManifest) -> impl Future<Output = Result<()>> + Send;
}

pub struct SetupOrchestrator<N> {
    manifest: Arc<ComponentManifest>,
    marker_path: PathBuf,
    installer: N,
}

impl<N: Installer> SetupOrchestrator<N> {
    pub fn new(manifest: Arc<ComponentManifest>, marker_path: impl Into<PathBuf>, installer: N) -> Self {
        Self {
            manifest,
            marker_path: marker_path.into(),
            installer,
        }
    }

    pub fn installer(&self) -> &N {
        &self.installer
    }

    /// Perform exactly the work `report` lists, then record the marker.
    ///
    /// Steps run in order binaries, extensions, config, finalize. The first
    /// failing step aborts the run with [`Error::SetupFailed`] and the marker
    /// is left untouched.
    pub async fn run<F>(&self, report: &PreflightReport, progress: F) -> Result<()>
    where
        F: Fn(SetupProgress) + Send + Sync,
    {
        for name in &report.missing_binaries {
            let Some(binary) = self.manifest.binary(name) else {
                debug!(binary = %name, "not in manifest, skipping");
                continue;
            };
            progress(SetupProgress::new(
                SetupStep::BinaryDownload,
                format!("Installing {} {}", binary.name, binary.version),
            ));
            self.installer
                .install_binary(binary)
                .await
                .map_err(|e| failed(SetupStep::BinaryDownload, e))?;
        }

        let extensions = report
            .missing_extensions
            .iter()
            .chain(&report.outdated_extensions)
            .filter_map(|id| self.manifest.extension(id));
        for extension in extensions {
            progress(SetupProgress::new(
                SetupStep::Extensions,
                format!("Installing extension {}@{}", extension.id, extension.version),
            ));
            self.installer
                .install_extension(extension)
                .await
                .map_err(|e| failed(SetupStep::Extensions, e))?;
        }

        if report.stale_config {
            progress(SetupProgress::new(SetupStep::Config, "Writing configuration"));
            self.installer
                .write_config(&self.manifest)
                .await
                .map_err(|e| failed(SetupStep::Config, e))?;
        }

        progress(SetupProgress::new(SetupStep::Finalize, "Recording setup"));
        SetupMarker::for_manifest(&self.manifest)
            .write(&self.marker_path)
            .await
            .map_err(|e| failed(SetupStep::Finalize, e))?;

        info!(marker = %self.marker_path.display(), "setup complete");
        Ok(())
    }
}

fn failed(step: SetupStep, e: Error) -> Error {
    match e {
        already @ Error::SetupFailed { .. } => already,
        other => Error::SetupFailed {
            step,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::setup::preflight::tests::manifest;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every call; optionally fails one step.
    #[derive(Default)]
    pub(crate) struct FakeInstaller {
        pub calls: Mutex<Vec<String>>,
        pub fail_on: Option<SetupStep>,
    }

    impl FakeInstaller {
        fn record(&self, call: String, step: SetupStep) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail_on == Some(step) {
                return Err(Error::Other(format!("{step} broke")));
            }
            Ok(())
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Installer for FakeInstaller {
        async fn install_binary(&self, binary: &ManagedBinary) -> Result<()> {
            self.record(format!("binary:{}", binary.name), SetupStep::BinaryDownload)
        }

        async fn install_extension(&self, extension: &ManagedExtension) -> Result<()> {
            self.record(format!("extension:{}", extension.id), SetupStep::Extensions)
        }

        async fn write_config(&self, _manifest: &ComponentManifest) -> Result<()> {
            self.record("config".to_string(), SetupStep::Config)
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_runs_only_listed_work() {
        let temp = TempDir::new().unwrap();
        let marker_path = temp.path().join("setup.json");
        let orchestrator = SetupOrchestrator::new(manifest(), &marker_path, FakeInstaller::default());

        let report = PreflightReport {
            needs_setup: true,
            missing_binaries: set(&["helper"]),
            outdated_extensions: set(&["pub.beta"]),
            ..Default::default()
        };
        let events = Mutex::new(Vec::new());
        orchestrator
            .run(&report, |p| events.lock().unwrap().push(p.step))
            .await
            .unwrap();

        assert_eq!(
            orchestrator.installer.calls(),
            vec!["binary:helper", "extension:pub.beta"]
        );
        assert_eq!(
            events.into_inner().unwrap(),
            vec![SetupStep::BinaryDownload, SetupStep::Extensions, SetupStep::Finalize]
        );
        assert!(SetupMarker::read(&marker_path).await.unwrap().matches(&manifest()));
    }

    #[tokio::test]
    async fn test_full_run_order() {
        let temp = TempDir::new().unwrap();
        let orchestrator = SetupOrchestrator::new(
            manifest(),
            temp.path().join("setup.json"),
            FakeInstaller::default(),
        );
        let report = PreflightReport {
            needs_setup: true,
            missing_binaries: set(&["opencode"]),
            missing_extensions: set(&["pub.alpha"]),
            outdated_extensions: set(&["pub.beta"]),
            stale_config: true,
        };
        orchestrator.run(&report, |_| {}).await.unwrap();
        assert_eq!(
            orchestrator.installer.calls(),
            vec!["binary:opencode", "extension:pub.alpha", "extension:pub.beta", "config"]
        );
    }

    #[tokio::test]
    async fn test_failure_leaves_no_marker() {
        let temp = TempDir::new().unwrap();
        let marker_path = temp.path().join("setup.json");
        let installer = FakeInstaller {
            fail_on: Some(SetupStep::Extensions),
            ..Default::default()
        };
        let orchestrator = SetupOrchestrator::new(manifest(), &marker_path, installer);
        let report = PreflightReport {
            needs_setup: true,
            missing_extensions: set(&["pub.alpha"]),
            stale_config: true,
            ..Default::default()
        };

        let err = orchestrator.run(&report, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SetupFailed {
                step: SetupStep::Extensions,
                ..
            }
        ));
        assert_eq!(orchestrator.installer.calls(), vec!["extension:pub.alpha"]);
        assert!(!marker_path.exists());
    }
}
