//! CLI command handlers.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use docket_config::LoadedConfig;
use docket_store::PortalStore;

pub mod config;
pub mod record;
pub mod start;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Open the portal database named by the configuration.
    pub fn open_store(&self) -> Result<Arc<PortalStore>> {
        let path = self.loaded.database_path();
        let store = PortalStore::open(&path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Arc::new(store))
    }
}
