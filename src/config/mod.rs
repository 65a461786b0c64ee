//! Configuration for Burrow.
//!
//! ## config.kdl
//!
//! Located at `~/.config/burrow/config.kdl` (or `$BURROW_CONFIG`). Holds the
//! data directory, workspace location, install mode, editor CLI and pinned
//! component versions. See [`schema`] for the node reference.
//!
//! ## Precedence
//!
//! CLI flag > environment > config.kdl > defaults. Use the [`resolver`]
//! module for resolution with source tracking; [`Layout`] turns the result
//! into concrete paths.

pub mod resolver;
pub mod schema;

pub use resolver::{
    resolve_config, resolve_config_with_env, resolve_env_layout, resolve_env_layout_with_env,
    ConfigOverrides, Layout, Resolved, ResolvedConfig, ValueSource, CONFIG_ENV, DATA_DIR_ENV,
    INSTALL_MODE_ENV,
};
pub use schema::BurrowConfig;
