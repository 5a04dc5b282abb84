//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/docket/config.toml` (XDG user config)
//! 2. `./docket.toml` (project-local)
//! 3. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{ConfigError, DocketConfig, Result, defaults};

/// Default config filename for project-local config.
pub const PROJECT_CONFIG_FILE: &str = "docket.toml";

/// Default config filename within XDG config directory.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "docket";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "DOCKET_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: DocketConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// User config directory used for this load, if one was resolved.
    pub config_dir: Option<PathBuf>,
    /// Warnings generated during loading (e.g., unparseable layers).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }

    /// Database path: `[storage] database`, else `docket.db` in the config
    /// dir, else `./docket.db`.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = self.config.storage.as_ref().and_then(|s| s.database.clone()) {
            return path;
        }
        match &self.config_dir {
            Some(dir) => dir.join(defaults::DATABASE_FILE),
            None => PathBuf::from(defaults::DATABASE_FILE),
        }
    }

    /// Path of the user config file for this load.
    pub fn user_config_path(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|d| d.join(USER_CONFIG_FILE))
    }

    /// Directory for JSON log files.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|d| d.join("logs"))
    }
}

/// Load configuration by discovering and merging all config layers.
///
/// Searches for config files in order:
/// 1. User config dir (`DOCKET_CONFIG_DIR` env, or platform default)
/// 2. Project-local (`./docket.toml` or specified project dir)
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `DOCKET_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = DocketConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let config_dir = match config_dir {
        Some(dir) => Some(dir.to_path_buf()),
        None => xdg_config_dir(),
    };
    if let Some(dir) = &config_dir {
        let source = load_layer(&mut config, &dir.join(USER_CONFIG_FILE), &mut warnings);
        sources.push(source);
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    let source = load_layer(&mut config, &project_path, &mut warnings);
    sources.push(source);

    Ok(LoadedConfig {
        config,
        sources,
        config_dir,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<DocketConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    DocketConfig::from_toml(&contents)
}

/// Save configuration to a file.
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &DocketConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the XDG config file path for docket.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the XDG config directory for docket.
///
/// Checks `DOCKET_CONFIG_DIR` env var first, then falls back to platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Try to load a config file and merge it into the existing config.
///
/// A missing file is skipped; an unreadable or malformed one is skipped
/// with a warning.
fn load_layer(config: &mut DocketConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
