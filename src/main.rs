//! Burrow CLI - disposable git-worktree workspaces paired with local agents.

use burrow::cli::{
    Cli, Commands, ConfigCommands, MetaCommands, ProjectCommands, ScriptCommands, SetupCommands,
    WorkspaceCommands,
};
use burrow::commands::{self, Output};
use burrow::config::{resolve_config, resolve_env_layout, ConfigOverrides};
use burrow::session::attach;
use clap::Parser;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log filter, e.g. `BURROW_LOG=burrow=debug`.
const LOG_ENV: &str = "BURROW_LOG";
/// Set to `json` for machine-readable logs.
const LOG_FORMAT_ENV: &str = "BURROW_LOG_FORMAT";

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    init_logging(cli.verbose);

    let mut overrides = ConfigOverrides::new();
    if let Some(dir) = cli.data_dir {
        overrides = overrides.with_data_dir(dir);
    }
    if let Some(file) = cli.config {
        overrides = overrides.with_config_file(file);
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| burrow::Error::Other(format!("Failed to create runtime: {}", e)))
        .and_then(|runtime| runtime.block_on(run_command(cli.command, &overrides, human)));

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => fail(&e, human),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "burrow=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr; stdout carries command output
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var(LOG_FORMAT_ENV).is_ok_and(|f| f == "json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn fail(e: &burrow::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!(
            "{}",
            serde_json::json!({ "error": e.to_string(), "code": e.code() })
        );
    }
    process::exit(1);
}

/// Resolve and launch the agent for the working directory. Failures are
/// printed as plain text, never as JSON, since the wrappers show them as-is.
fn run_attach(overrides: &ConfigOverrides, args: &[std::ffi::OsString]) -> i32 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("Failed to read current directory: {}", e);
            return attach::RESOLUTION_FAILURE;
        }
    };
    let layout = match resolve_config(overrides) {
        Ok(config) => Ok(config.layout()),
        Err(e) => {
            tracing::warn!(error = %e, "config file unreadable, using environment layout");
            resolve_env_layout(overrides)
        }
    };
    let layout = match layout {
        Ok(layout) => layout,
        Err(e) => {
            eprintln!("{}", e);
            return attach::RESOLUTION_FAILURE;
        }
    };
    attach::run(&cwd, &layout.ports_file(), &layout.agent_binary, args)
}

/// Run one command. `Ok(false)` means the command printed a failure result
/// and the process should exit non-zero.
///
/// `config.kdl` is only read by commands that need it, so `id` and `attach`
/// keep working when the file is broken.
async fn run_command(
    command: Commands,
    overrides: &ConfigOverrides,
    human: bool,
) -> Result<bool, burrow::Error> {
    let layout = || resolve_config(overrides).map(|config| config.layout());

    match command {
        Commands::Id { path } => {
            output(&commands::id(path.as_deref())?, human);
        }
        Commands::Project { command } => {
            let layout = layout()?;
            match command {
                ProjectCommands::Add { path } => {
                    output(&commands::project_add(&layout, path.as_deref()).await?, human);
                }
                ProjectCommands::List => {
                    output(&commands::project_list(&layout).await?, human);
                }
                ProjectCommands::Remove { path } => {
                    output(&commands::project_remove(&layout, path.as_deref()).await?, human);
                }
            }
        }
        Commands::Workspace { repo, command } => {
            let layout = layout()?;
            let repo = repo.as_deref();
            match command {
                WorkspaceCommands::List => {
                    output(&commands::workspace_list(&layout, repo).await?, human);
                }
                WorkspaceCommands::Create { name, base } => {
                    let result = commands::workspace_create(&layout, repo, &name, &base).await?;
                    output(&result, human);
                }
                WorkspaceCommands::Remove { name } => {
                    output(&commands::workspace_remove(&layout, repo, &name).await?, human);
                }
                WorkspaceCommands::Meta { command } => match command {
                    MetaCommands::Get { path } => {
                        output(&commands::meta_get(&layout, path.as_deref()).await?, human);
                    }
                    MetaCommands::Set {
                        key,
                        value,
                        unset: _,
                        path,
                    } => {
                        let result =
                            commands::meta_set(&layout, path.as_deref(), &key, value.as_deref())
                                .await?;
                        output(&result, human);
                    }
                },
            }
        }
        Commands::Setup { command } => {
            let config = resolve_config(overrides)?;
            match command {
                SetupCommands::Status => {
                    output(&commands::setup_status(&config).await?, human);
                }
                SetupCommands::Run => {
                    let result = commands::setup_run(&config, move |event| {
                        if human {
                            eprintln!("[{}] {}", event.step, event.message);
                        } else {
                            eprintln!("{}", serde_json::json!({ "progress": event }));
                        }
                    })
                    .await?;
                    output(&result, human);
                    return Ok(result.success());
                }
            }
        }
        Commands::Sessions => {
            output(&commands::sessions(&layout()?), human);
        }
        Commands::Script { command } => {
            let layout = layout()?;
            match command {
                ScriptCommands::Render { platform } => {
                    output(&commands::script_render(&layout, platform)?, human);
                }
                ScriptCommands::Install => {
                    output(&commands::script_install(&layout).await?, human);
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                output(&commands::config_show(&resolve_config(overrides)?), human);
            }
        },
        // Replaces this process (or mirrors the child's exit code)
        Commands::Attach { args } => process::exit(run_attach(overrides, &args)),
    }

    Ok(true)
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
