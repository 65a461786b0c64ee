//! CLI argument definitions for Burrow.

use crate::session::script::ScriptPlatform;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Version string including the commit and build time.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BURROW_GIT_COMMIT"),
    " ",
    env!("BURROW_BUILD_TIMESTAMP"),
    ")"
);

/// Burrow - disposable git-worktree workspaces paired with local agents.
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(author, version = VERSION, about = "Disposable git-worktree workspaces paired with local opencode agents", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Log debug output to stderr (BURROW_LOG overrides the filter)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Data directory (overrides BURROW_DATA_DIR and config.kdl)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Config file (overrides BURROW_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the project ID of a repository path
    Id {
        /// Repository path (defaults to the current directory)
        path: Option<PathBuf>,
    },

    /// Manage the set of opened repositories
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Manage the workspaces (linked worktrees) of a repository
    Workspace {
        /// Repository to operate on (defaults to the one containing the current directory)
        #[arg(short = 'C', long = "repo")]
        repo: Option<PathBuf>,

        #[command(subcommand)]
        command: WorkspaceCommands,
    },

    /// Check or run setup of managed components
    Setup {
        #[command(subcommand)]
        command: SetupCommands,
    },

    /// List running agent sessions from the port registry
    Sessions,

    /// Generate the `oc` attach wrappers
    Script {
        #[command(subcommand)]
        command: ScriptCommands,
    },

    /// Attach to the agent serving the current workspace
    ///
    /// This is what the generated `oc` wrappers run. Extra arguments are
    /// passed through to `opencode attach`.
    Attach {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<OsString>,
    },

    /// Show resolved configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Project subcommands
#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Remember a repository
    Add {
        /// Repository path (defaults to the current repository)
        path: Option<PathBuf>,
    },

    /// List remembered repositories
    List,

    /// Forget a repository (its workspaces are untouched)
    Remove {
        /// Repository path (defaults to the current repository)
        path: Option<PathBuf>,
    },
}

/// Workspace subcommands
#[derive(Subcommand, Debug)]
pub enum WorkspaceCommands {
    /// List workspaces
    List,

    /// Create a workspace on a new branch
    Create {
        /// Workspace (and branch) name, e.g. feature/login
        name: String,

        /// Branch to create the workspace from
        #[arg(short, long, default_value = "main")]
        base: String,
    },

    /// Remove a workspace, its branch and its metadata
    Remove {
        /// Workspace name
        name: String,
    },

    /// Read or write workspace metadata
    Meta {
        #[command(subcommand)]
        command: MetaCommands,
    },
}

/// Metadata subcommands
#[derive(Subcommand, Debug)]
pub enum MetaCommands {
    /// Show all metadata of a workspace
    Get {
        /// Workspace directory (defaults to the current worktree)
        path: Option<PathBuf>,
    },

    /// Set or delete one metadata key
    Set {
        /// Key, e.g. `base` or `pr-url`
        key: String,

        /// New value (omit together with --unset to delete)
        #[arg(required_unless_present = "unset")]
        value: Option<String>,

        /// Delete the key instead of setting it
        #[arg(long, conflicts_with = "value")]
        unset: bool,

        /// Workspace directory (defaults to the current worktree)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Setup subcommands
#[derive(Subcommand, Debug)]
pub enum SetupCommands {
    /// Report whether setup is needed and what is missing
    Status,

    /// Install whatever is missing, then start services
    Run,
}

/// Script subcommands
#[derive(Subcommand, Debug)]
pub enum ScriptCommands {
    /// Print a wrapper to stdout
    Render {
        /// Target platform: unix or windows (defaults to this platform)
        #[arg(long, value_parser = parse_platform)]
        platform: Option<ScriptPlatform>,
    },

    /// Write both wrappers into the bin directory
    Install,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show every resolved setting and where it came from
    Show,
}

fn parse_platform(s: &str) -> Result<ScriptPlatform, String> {
    ScriptPlatform::parse(s).ok_or_else(|| format!("unknown platform '{s}' (expected unix or windows)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_attach_passes_through_arguments() {
        let cli = Cli::parse_from(["burrow", "attach", "--model", "x", "-c"]);
        match cli.command {
            Commands::Attach { args } => assert_eq!(args, vec!["--model", "x", "-c"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_meta_set_requires_value_or_unset() {
        assert!(Cli::try_parse_from(["burrow", "workspace", "meta", "set", "k"]).is_err());
        assert!(Cli::try_parse_from(["burrow", "workspace", "meta", "set", "k", "--unset"]).is_ok());
        assert!(Cli::try_parse_from(["burrow", "workspace", "meta", "set", "k", "v", "--unset"]).is_err());
    }

    #[test]
    fn test_platform_flag() {
        let cli = Cli::parse_from(["burrow", "script", "render", "--platform", "windows"]);
        assert!(matches!(
            cli.command,
            Commands::Script {
                command: ScriptCommands::Render {
                    platform: Some(ScriptPlatform::Windows)
                }
            }
        ));
        assert!(Cli::try_parse_from(["burrow", "script", "render", "--platform", "beos"]).is_err());
    }
}
