//! Precedence resolution and the on-disk layout.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment (`BURROW_DATA_DIR`, `BURROW_CONFIG`, `BURROW_INSTALL_MODE`)
//! 3. `config.kdl`
//! 4. Built-in defaults

use super::schema::BurrowConfig;
use crate::session::attach::{AGENT_BIN_ENV, PORTS_FILE_ENV};
use crate::session::PORTS_FILE;
use crate::setup::manifest::{ComponentManifest, AGENT_BINARY};
use crate::setup::InstallMode;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "BURROW_DATA_DIR";

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "BURROW_CONFIG";

/// Overrides the install mode.
pub const INSTALL_MODE_ENV: &str = "BURROW_INSTALL_MODE";

/// Default editor CLI for extension management.
pub const DEFAULT_EDITOR: &str = "code";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    ConfigFile,
    /// Derived from another resolved value
    Derived,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Derived => write!(f, "derived"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config_file: Resolved<PathBuf>,
    pub data_dir: Resolved<PathBuf>,
    pub workspaces_dir: Resolved<PathBuf>,
    pub install_mode: Resolved<InstallMode>,
    pub editor: Resolved<String>,
    pub agent_binary: Resolved<PathBuf>,
    pub manifest: ComponentManifest,
}

impl ResolvedConfig {
    pub fn layout(&self) -> Layout {
        Layout {
            data_dir: self.data_dir.value.clone(),
            workspaces_dir: self.workspaces_dir.value.clone(),
            agent_binary: self.agent_binary.value.clone(),
        }
    }
}

/// Resolve configuration from the process environment.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    resolve_config_with_env(overrides, |name| std::env::var(name).ok())
}

/// Resolve configuration with an explicit environment lookup.
pub fn resolve_config_with_env<F>(overrides: &ConfigOverrides, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |name: &str| env(name).filter(|v| !v.is_empty());

    let config_file = if let Some(ref path) = overrides.config_file {
        Resolved::new(path.clone(), ValueSource::CliFlag)
    } else if let Some(path) = env(CONFIG_ENV) {
        Resolved::new(PathBuf::from(path), ValueSource::EnvVar(CONFIG_ENV.to_string()))
    } else {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        Resolved::new(dir.join("burrow").join("config.kdl"), ValueSource::Default)
    };

    let file = BurrowConfig::load(&config_file.value)?;

    let data_dir = if let Some(ref dir) = overrides.data_dir {
        Resolved::new(dir.clone(), ValueSource::CliFlag)
    } else if let Some(dir) = env(DATA_DIR_ENV) {
        Resolved::new(PathBuf::from(dir), ValueSource::EnvVar(DATA_DIR_ENV.to_string()))
    } else if let Some(ref dir) = file.data_dir {
        Resolved::new(dir.clone(), ValueSource::ConfigFile)
    } else {
        Resolved::new(default_data_dir()?, ValueSource::Default)
    };

    let workspaces_dir = match file.workspaces_dir {
        Some(ref dir) => Resolved::new(dir.clone(), ValueSource::ConfigFile),
        None => Resolved::new(data_dir.value.join("workspaces"), ValueSource::Derived),
    };

    let install_mode = match env(INSTALL_MODE_ENV) {
        Some(raw) => {
            let mode = InstallMode::parse(&raw).ok_or_else(|| {
                Error::Config(format!("{INSTALL_MODE_ENV} must be 'managed' or 'external', got '{raw}'"))
            })?;
            Resolved::new(mode, ValueSource::EnvVar(INSTALL_MODE_ENV.to_string()))
        }
        None => match file.install_mode {
            Some(mode) => Resolved::new(mode, ValueSource::ConfigFile),
            None => Resolved::new(InstallMode::default(), ValueSource::Default),
        },
    };

    let editor = match file.editor {
        Some(ref editor) => Resolved::new(editor.clone(), ValueSource::ConfigFile),
        None => Resolved::new(DEFAULT_EDITOR.to_string(), ValueSource::Default),
    };

    let manifest = file.manifest();
    let agent_binary = if let Some(path) = env(AGENT_BIN_ENV) {
        Resolved::new(PathBuf::from(path), ValueSource::EnvVar(AGENT_BIN_ENV.to_string()))
    } else if let Some(ref path) = file.agent_binary {
        Resolved::new(path.clone(), ValueSource::ConfigFile)
    } else {
        let file_name = manifest
            .binary(AGENT_BINARY)
            .map(|b| b.file_name())
            .unwrap_or_else(|| AGENT_BINARY.to_string());
        Resolved::new(
            data_dir.value.join("bin").join(file_name),
            ValueSource::Derived,
        )
    };

    Ok(ResolvedConfig {
        config_file,
        data_dir,
        workspaces_dir,
        install_mode,
        editor,
        agent_binary,
        manifest,
    })
}

/// Layout from CLI flags and environment alone; `config.kdl` is never read.
///
/// `attach` falls back to this when the config file cannot be loaded. The
/// generated wrappers pass the registry and agent locations through the
/// environment, so a broken config file does not stop them.
pub fn resolve_env_layout(overrides: &ConfigOverrides) -> Result<Layout> {
    resolve_env_layout_with_env(overrides, |name| std::env::var(name).ok())
}

pub fn resolve_env_layout_with_env<F>(overrides: &ConfigOverrides, env: F) -> Result<Layout>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |name: &str| env(name).filter(|v| !v.is_empty());

    let data_dir = match (&overrides.data_dir, env(DATA_DIR_ENV)) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dir)) => PathBuf::from(dir),
        (None, None) => default_data_dir()?,
    };
    let mut layout = Layout::under(data_dir);
    if let Some(path) = env(AGENT_BIN_ENV) {
        layout.agent_binary = PathBuf::from(path);
    }
    Ok(layout)
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("burrow"))
        .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))
}

/// Every on-disk location, derived from the resolved data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub data_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    pub agent_binary: PathBuf,
}

impl Layout {
    /// Layout with every path under `data_dir`.
    pub fn under(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            workspaces_dir: data_dir.join("workspaces"),
            agent_binary: data_dir.join("bin").join(AGENT_BINARY),
            data_dir,
        }
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }

    pub fn marker_file(&self) -> PathBuf {
        self.data_dir.join("setup.json")
    }

    /// Port registry; `BURROW_PORTS_FILE` wins when set.
    pub fn ports_file(&self) -> PathBuf {
        match std::env::var_os(PORTS_FILE_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.data_dir.join(PORTS_FILE),
        }
    }

    pub fn agent_config(&self) -> PathBuf {
        self.data_dir.join("agent").join("opencode.json")
    }

    /// Directory for the workspaces of one project.
    pub fn project_workspaces_dir(&self, repo: &Path) -> PathBuf {
        self.workspaces_dir.join(crate::identity::dir_name_for(repo))
    }
}
