//! Setup and preflight orchestration.
//!
//! On every launch the [`LifecycleGate`] asks the [`PreflightChecker`]
//! whether any managed binary, editor extension or configuration is
//! missing or stale. If so, the [`SetupOrchestrator`] performs exactly the
//! missing work, reports progress, and records a [`SetupMarker`] once
//! everything succeeded.
//!
//! ```text
//! unknown ──get_state──▶ setup ──setup()──▶ loading ──start_services──▶ ready
//!         └────────────▶ loading ─────────────────────┘
//! ```

pub mod gate;
pub mod installer;
pub mod manifest;
pub mod marker;
pub mod orchestrator;
pub mod preflight;

pub use gate::{GateResponse, GateState, LifecycleGate, LifecycleState, ServiceStarter};
pub use installer::SystemInstaller;
pub use manifest::{ComponentManifest, ManagedBinary, ManagedExtension};
pub use marker::{SetupMarker, MARKER_SCHEMA_VERSION};
pub use orchestrator::{Installer, SetupOrchestrator};
pub use preflight::{ComponentInspector, PreflightChecker, PreflightReport};

use serde::{Deserialize, Serialize};
use std::fmt;

/// How managed components are provided for this installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Burrow downloads and installs its own components
    #[default]
    Managed,
    /// Components are provided externally; setup never runs
    External,
}

impl InstallMode {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "managed" => Some(Self::Managed),
            "external" | "system" => Some(Self::External),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::External => "external",
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase of a setup run, as reported in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupStep {
    BinaryDownload,
    Extensions,
    Config,
    /// Internal bookkeeping; never surfaced past the gate
    Finalize,
}

impl SetupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinaryDownload => "binary-download",
            Self::Extensions => "extensions",
            Self::Config => "config",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress event emitted while setup runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupProgress {
    pub step: SetupStep,
    pub message: String,
}

impl SetupProgress {
    pub fn new(step: SetupStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

/// Why a preflight check could not produce a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreflightFailureKind {
    BinaryProbe,
    ExtensionProbe,
}

impl fmt::Display for PreflightFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BinaryProbe => write!(f, "binary-probe"),
            Self::ExtensionProbe => write!(f, "extension-probe"),
        }
    }
}
