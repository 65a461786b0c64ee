//! Generated `oc` wrappers.
//!
//! Both platforms get a thin wrapper around the same resolver
//! (`burrow attach`), so resolution behaves identically everywhere. Only the
//! outer shell syntax differs.

use super::attach::{AGENT_BIN_ENV, PORTS_FILE_ENV};
use crate::fsutil::write_atomic;
use crate::Result;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the Unix wrapper inside the bin directory.
pub const UNIX_SCRIPT: &str = "oc";

/// Name of the Windows wrapper inside the bin directory.
pub const WINDOWS_SCRIPT: &str = "oc.cmd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptPlatform {
    Unix,
    Windows,
}

impl ScriptPlatform {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unix" | "sh" => Some(Self::Unix),
            "windows" | "cmd" => Some(Self::Windows),
            _ => None,
        }
    }

    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Unix => UNIX_SCRIPT,
            Self::Windows => WINDOWS_SCRIPT,
        }
    }
}

/// Locations baked into a wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachScript {
    /// The `burrow` executable providing `attach`
    pub resolver_bin: PathBuf,
    pub ports_file: PathBuf,
    pub agent_bin: PathBuf,
}

/// Render the wrapper for `platform`. Pure.
pub fn render(platform: ScriptPlatform, script: &AttachScript) -> String {
    let resolver = script.resolver_bin.display();
    let ports = script.ports_file.display();
    let agent = script.agent_bin.display();

    let mut out = String::new();
    match platform {
        ScriptPlatform::Unix => {
            let _ = writeln!(out, "#!/bin/sh");
            let _ = writeln!(out, "# Generated by burrow. Attaches to this workspace's opencode server.");
            let _ = writeln!(out, "{PORTS_FILE_ENV}={}", sh_quote(&ports.to_string()));
            let _ = writeln!(out, "{AGENT_BIN_ENV}={}", sh_quote(&agent.to_string()));
            let _ = writeln!(out, "export {PORTS_FILE_ENV} {AGENT_BIN_ENV}");
            let _ = writeln!(out, "exec {} attach \"$@\"", sh_quote(&resolver.to_string()));
        }
        ScriptPlatform::Windows => {
            let _ = write!(out, "@echo off\r\n");
            let _ = write!(out, "rem Generated by burrow. Attaches to this workspace's opencode server.\r\n");
            let _ = write!(out, "setlocal\r\n");
            let _ = write!(out, "set \"{PORTS_FILE_ENV}={ports}\"\r\n");
            let _ = write!(out, "set \"{AGENT_BIN_ENV}={agent}\"\r\n");
            let _ = write!(out, "\"{resolver}\" attach %*\r\n");
            let _ = write!(out, "exit /b %ERRORLEVEL%\r\n");
        }
    }
    out
}

/// Single-quote for POSIX sh.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Write both wrappers into `bin_dir`.
pub async fn install(bin_dir: &Path, script: &AttachScript) -> Result<()> {
    for platform in [ScriptPlatform::Unix, ScriptPlatform::Windows] {
        let path = bin_dir.join(platform.file_name());
        write_atomic(&path, render(platform, script).into_bytes()).await?;
        #[cfg(unix)]
        if platform == ScriptPlatform::Unix {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }
        debug!(path = %path.display(), "attach wrapper written");
    }
    Ok(())
}
