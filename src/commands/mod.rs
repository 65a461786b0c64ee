//! Command implementations for the Burrow CLI.
//!
//! Each command returns a result struct implementing [`Output`], so `main`
//! can print it as JSON (default) or human-readable text (`-H`).

use crate::config::{Layout, ResolvedConfig};
use crate::git::{find_git_root, main_repository, SystemGit};
use crate::identity::{absolute_path, project_display_name, project_id, ProjectId, WorkspaceName};
use crate::project::{Project, ProjectRegistry};
use crate::session::script::{self, AttachScript, ScriptPlatform};
use crate::session::PortRegistry;
use crate::setup::gate::{GateResponse, GateState, LifecycleGate, ServiceStarter};
use crate::setup::{
    InstallMode, PreflightChecker, PreflightReport, SetupOrchestrator, SetupProgress,
    SystemInstaller,
};
use crate::workspace::{Workspace, WorkspaceMetadata, WorkspaceRef, WorktreeProvider};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

/// The directory commands act on when no path is given.
fn current_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

/// Absolute form of a user-supplied path, relative to the working directory.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
    let cwd = current_dir()?;
    match path {
        Some(path) => absolute_path(cwd.join(path)),
        None => Ok(cwd),
    }
}

async fn repository(path: Option<&Path>) -> Result<PathBuf> {
    let start = resolve_path(path)?;
    main_repository(&SystemGit::new(), &start).await
}

fn provider(layout: &Layout, repo: &Path) -> Result<WorktreeProvider> {
    WorktreeProvider::new(repo, layout.project_workspaces_dir(repo))
}

// === id ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdResult {
    pub id: ProjectId,
    pub path: PathBuf,
}

impl Output for IdResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.id.to_string()
    }
}

pub fn id(path: Option<&Path>) -> Result<IdResult> {
    let path = resolve_path(path)?;
    Ok(IdResult {
        id: project_id(&path),
        path,
    })
}

// === project ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub path: PathBuf,
    pub exists: bool,
}

impl ProjectSummary {
    fn for_path(path: PathBuf) -> Self {
        Self {
            id: project_id(&path),
            name: project_display_name(&path),
            exists: path.is_dir(),
            path,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAdded {
    pub project: Project,
}

impl Output for ProjectAdded {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Added {} ({}) with {} workspace(s)",
            self.project.name,
            self.project.id,
            self.project.workspaces.len()
        )
    }
}

pub async fn project_add(layout: &Layout, path: Option<&Path>) -> Result<ProjectAdded> {
    let repo = repository(path).await?;
    let project = Project::open(&provider(layout, &repo)?).await?;
    ProjectRegistry::new(layout.projects_dir()).save(&repo).await?;
    info!(id = %project.id, "project added");
    Ok(ProjectAdded { project })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectList {
    pub projects: Vec<ProjectSummary>,
    pub count: usize,
}

impl Output for ProjectList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.projects.is_empty() {
            return "No projects.".to_string();
        }
        let mut lines = vec![format!("{} project(s):", self.count)];
        for p in &self.projects {
            let missing = if p.exists { "" } else { " [missing]" };
            lines.push(format!("  {}  {}{}", p.id, p.path.display(), missing));
        }
        lines.join("\n")
    }
}

pub async fn project_list(layout: &Layout) -> Result<ProjectList> {
    let projects: Vec<_> = ProjectRegistry::new(layout.projects_dir())
        .load_all()
        .await?
        .into_iter()
        .map(ProjectSummary::for_path)
        .collect();
    Ok(ProjectList {
        count: projects.len(),
        projects,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRemoved {
    pub path: PathBuf,
}

impl Output for ProjectRemoved {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Removed {}", self.path.display())
    }
}

pub async fn project_remove(layout: &Layout, path: Option<&Path>) -> Result<ProjectRemoved> {
    // The repository may already be gone from disk
    let path = match path {
        Some(path) => resolve_path(Some(path))?,
        None => repository(None).await?,
    };
    ProjectRegistry::new(layout.projects_dir()).remove(&path).await?;
    Ok(ProjectRemoved { path })
}

// === workspace ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceList {
    pub project_id: ProjectId,
    pub workspaces: Vec<Workspace>,
    pub count: usize,
}

impl Output for WorkspaceList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.workspaces.is_empty() {
            return "No workspaces.".to_string();
        }
        let mut lines = vec![format!("{} workspace(s):", self.count)];
        for ws in &self.workspaces {
            lines.push(format!(
                "  {} (from {})  {}",
                ws.name,
                ws.metadata.base,
                ws.path.display()
            ));
        }
        lines.join("\n")
    }
}

pub async fn workspace_list(layout: &Layout, repo: Option<&Path>) -> Result<WorkspaceList> {
    let repo = repository(repo).await?;
    let provider = provider(layout, &repo)?;
    let workspaces = provider.discover().await?;
    Ok(WorkspaceList {
        project_id: provider.project_id().clone(),
        count: workspaces.len(),
        workspaces,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceCreated {
    pub workspace: Workspace,
}

impl Output for WorkspaceCreated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Created workspace {} from {} at {}",
            self.workspace.name,
            self.workspace.metadata.base,
            self.workspace.path.display()
        )
    }
}

pub async fn workspace_create(
    layout: &Layout,
    repo: Option<&Path>,
    name: &str,
    base: &str,
) -> Result<WorkspaceCreated> {
    let name = WorkspaceName::parse(name)?;
    let repo = repository(repo).await?;
    let workspace = provider(layout, &repo)?.create_workspace(&name, base).await?;
    Ok(WorkspaceCreated { workspace })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRemoved {
    pub workspace: WorkspaceRef,
}

impl Output for WorkspaceRemoved {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Removed workspace {}", self.workspace.workspace_name)
    }
}

pub async fn workspace_remove(
    layout: &Layout,
    repo: Option<&Path>,
    name: &str,
) -> Result<WorkspaceRemoved> {
    let name = WorkspaceName::parse(name)?;
    let repo = repository(repo).await?;
    let provider = provider(layout, &repo)?;
    let workspace = provider
        .discover()
        .await?
        .into_iter()
        .find(|ws| ws.name == name.as_str())
        .ok_or_else(|| Error::NotFound(format!("workspace {}", name)))?
        .workspace_ref();
    provider.remove_workspace(&workspace).await?;
    Ok(WorkspaceRemoved { workspace })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResult {
    pub path: PathBuf,
    pub metadata: WorkspaceMetadata,
}

impl Output for MetadataResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("base = {}", self.metadata.base)];
        for (key, value) in &self.metadata.extras {
            lines.push(format!("{} = {}", key, value));
        }
        lines.join("\n")
    }
}

/// Worktree root for `path` (or the working directory) and its provider.
async fn metadata_target(
    layout: &Layout,
    path: Option<&Path>,
) -> Result<(PathBuf, WorktreeProvider)> {
    let start = resolve_path(path)?;
    let worktree = find_git_root(&start)
        .ok_or_else(|| Error::NotFound(format!("Not in a git repository: {}", start.display())))?;
    let repo = main_repository(&SystemGit::new(), &worktree).await?;
    Ok((worktree, provider(layout, &repo)?))
}

pub async fn meta_get(layout: &Layout, path: Option<&Path>) -> Result<MetadataResult> {
    let (path, provider) = metadata_target(layout, path).await?;
    let metadata = provider.get_metadata(&path).await?;
    Ok(MetadataResult { path, metadata })
}

pub async fn meta_set(
    layout: &Layout,
    path: Option<&Path>,
    key: &str,
    value: Option<&str>,
) -> Result<MetadataResult> {
    let (path, provider) = metadata_target(layout, path).await?;
    provider.set_metadata(&path, key, value).await?;
    let metadata = provider.get_metadata(&path).await?;
    Ok(MetadataResult { path, metadata })
}

// === setup ===

/// Services started once setup is complete: the data layout and a runnable
/// agent binary.
pub struct LocalServices {
    layout: Layout,
    mode: InstallMode,
}

impl LocalServices {
    pub fn new(layout: Layout, mode: InstallMode) -> Self {
        Self { layout, mode }
    }

    fn agent_available(&self) -> bool {
        if self.layout.agent_binary.is_file() {
            return true;
        }
        // Externally provided agents may live anywhere on PATH
        self.mode == InstallMode::External
            && std::env::var_os("PATH").is_some_and(|paths| {
                std::env::split_paths(&paths).any(|dir| {
                    self.layout
                        .agent_binary
                        .file_name()
                        .is_some_and(|name| dir.join(name).is_file())
                })
            })
    }
}

impl ServiceStarter for LocalServices {
    async fn start(&self) -> Result<()> {
        for dir in [
            self.layout.projects_dir(),
            self.layout.workspaces_dir.clone(),
            self.layout.bin_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        if !self.agent_available() {
            return Err(Error::ServiceStart(format!(
                "opencode binary not found at {}",
                self.layout.agent_binary.display()
            )));
        }
        debug!(agent = %self.layout.agent_binary.display(), "services ready");
        Ok(())
    }
}

/// The lifecycle gate wired to the real installer.
pub type SystemGate = LifecycleGate<SystemInstaller, SystemInstaller, LocalServices>;

fn attach_script(layout: &Layout) -> Result<AttachScript> {
    Ok(AttachScript {
        resolver_bin: std::env::current_exe()?,
        ports_file: layout.ports_file(),
        agent_bin: layout.agent_binary.clone(),
    })
}

pub fn build_gate(config: &ResolvedConfig) -> Result<SystemGate> {
    let layout = config.layout();
    let manifest = Arc::new(config.manifest.clone());
    let installer = SystemInstaller::new(
        layout.bin_dir(),
        config.editor.value.clone(),
        layout.agent_config(),
        attach_script(&layout)?,
    );
    let mode = config.install_mode.value;
    Ok(LifecycleGate::new(
        mode,
        PreflightChecker::new(manifest.clone(), layout.marker_file(), installer.clone()),
        SetupOrchestrator::new(manifest, layout.marker_file(), installer),
        LocalServices::new(layout, mode),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatus {
    pub mode: InstallMode,
    pub state: GateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PreflightReport>,
}

impl Output for SetupStatus {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Mode: {}\nState: {}",
            self.mode,
            match self.state {
                GateState::Setup => "setup required",
                GateState::Loading => "ready to load",
            }
        )];
        if let Some(ref report) = self.report {
            let list = |items: &std::collections::BTreeSet<String>| {
                items.iter().cloned().collect::<Vec<_>>().join(", ")
            };
            if !report.missing_binaries.is_empty() {
                lines.push(format!("Missing binaries: {}", list(&report.missing_binaries)));
            }
            if !report.missing_extensions.is_empty() {
                lines.push(format!("Missing extensions: {}", list(&report.missing_extensions)));
            }
            if !report.outdated_extensions.is_empty() {
                lines.push(format!("Outdated extensions: {}", list(&report.outdated_extensions)));
            }
            if report.stale_config {
                lines.push("Configuration needs to be written".to_string());
            }
        }
        lines.join("\n")
    }
}

pub async fn setup_status(config: &ResolvedConfig) -> Result<SetupStatus> {
    let gate = build_gate(config)?;
    let state = gate.get_state().await;
    Ok(SetupStatus {
        mode: gate.mode(),
        state,
        report: gate.cached_report(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRun {
    pub initial_state: GateState,
    pub setup: GateResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<GateResponse>,
}

impl SetupRun {
    pub fn success(&self) -> bool {
        self.setup.success && self.services.as_ref().is_some_and(|s| s.success)
    }
}

impl Output for SetupRun {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let describe = |response: &GateResponse| match response.message {
            Some(ref message) if !response.success => format!("failed: {}", message),
            _ => "ok".to_string(),
        };
        let mut lines = vec![format!("Setup: {}", describe(&self.setup))];
        if let Some(ref services) = self.services {
            lines.push(format!("Services: {}", describe(services)));
        }
        lines.join("\n")
    }
}

/// Drive the gate end to end. `on_progress` sees every surfaced event.
pub async fn setup_run<F>(config: &ResolvedConfig, on_progress: F) -> Result<SetupRun>
where
    F: Fn(SetupProgress) + Send + 'static,
{
    let gate = build_gate(config)?;
    let initial_state = gate.get_state().await;

    let mut events = gate.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            on_progress(event);
        }
    });

    let setup = match initial_state {
        GateState::Setup => gate.setup().await,
        GateState::Loading => GateResponse::ok(),
    };
    let services = if setup.success {
        Some(gate.start_services().await)
    } else {
        None
    };

    // Closing the channel ends the printer
    drop(gate);
    let _ = printer.await;

    Ok(SetupRun {
        initial_state,
        setup,
        services,
    })
}

// === sessions ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub workspace_path: PathBuf,
    pub port: u16,
    pub url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    pub sessions: Vec<SessionEntry>,
    pub count: usize,
}

impl Output for SessionList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.sessions.is_empty() {
            return "No opencode servers are running.".to_string();
        }
        let mut lines = vec![format!("{} session(s):", self.count)];
        for s in &self.sessions {
            lines.push(format!("  {}  {}", s.url, s.workspace_path.display()));
        }
        lines.join("\n")
    }
}

pub fn sessions(layout: &Layout) -> SessionList {
    let sessions: Vec<_> = PortRegistry::load_or_empty(&layout.ports_file())
        .entries()
        .map(|(workspace_path, port)| SessionEntry {
            workspace_path,
            port,
            url: format!("http://127.0.0.1:{}", port),
        })
        .collect();
    SessionList {
        count: sessions.len(),
        sessions,
    }
}

// === script ===

pub struct RenderedScript {
    pub platform: ScriptPlatform,
    pub content: String,
}

impl Output for RenderedScript {
    // The script text is the payload in both modes
    fn to_json(&self) -> String {
        self.content.trim_end().to_string()
    }

    fn to_human(&self) -> String {
        self.content.trim_end().to_string()
    }
}

pub fn script_render(layout: &Layout, platform: Option<ScriptPlatform>) -> Result<RenderedScript> {
    let platform = platform.unwrap_or_else(ScriptPlatform::current);
    Ok(RenderedScript {
        platform,
        content: script::render(platform, &attach_script(layout)?),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInstalled {
    pub bin_dir: PathBuf,
    pub scripts: Vec<PathBuf>,
}

impl Output for ScriptInstalled {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Installed wrappers in {}", self.bin_dir.display())];
        lines.extend(self.scripts.iter().map(|p| format!("  {}", p.display())));
        lines.join("\n")
    }
}

pub async fn script_install(layout: &Layout) -> Result<ScriptInstalled> {
    let bin_dir = layout.bin_dir();
    script::install(&bin_dir, &attach_script(layout)?).await?;
    Ok(ScriptInstalled {
        scripts: [ScriptPlatform::Unix, ScriptPlatform::Windows]
            .iter()
            .map(|p| bin_dir.join(p.file_name()))
            .collect(),
        bin_dir,
    })
}

// === config ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: String,
    pub source: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigShow {
    pub settings: Vec<ConfigEntry>,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.settings
            .iter()
            .map(|e| format!("{:<15} {}  ({})", e.key, e.value, e.source))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn config_show(config: &ResolvedConfig) -> ConfigShow {
    let path = |p: &Path| p.display().to_string();
    let settings = vec![
        ConfigEntry {
            key: "config-file",
            value: path(&config.config_file.value),
            source: config.config_file.source.to_string(),
        },
        ConfigEntry {
            key: "data-dir",
            value: path(&config.data_dir.value),
            source: config.data_dir.source.to_string(),
        },
        ConfigEntry {
            key: "workspaces-dir",
            value: path(&config.workspaces_dir.value),
            source: config.workspaces_dir.source.to_string(),
        },
        ConfigEntry {
            key: "install-mode",
            value: config.install_mode.value.to_string(),
            source: config.install_mode.source.to_string(),
        },
        ConfigEntry {
            key: "editor",
            value: config.editor.value.clone(),
            source: config.editor.source.to_string(),
        },
        ConfigEntry {
            key: "agent-binary",
            value: path(&config.agent_binary.value),
            source: config.agent_binary.source.to_string(),
        },
    ];
    ConfigShow { settings }
}
