//! Configuration system for the Docket portal server.
//!
//! Provides TOML-based configuration with:
//! - Server, feed timing, storage and logging sections
//! - Tenant credentials (`[[tenants]]`, bearer token per tenant)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, PROJECT_CONFIG_FILE, USER_CONFIG_FILE, load_config, load_config_file,
    load_config_with_options, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
