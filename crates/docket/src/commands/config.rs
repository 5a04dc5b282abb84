//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use docket_config::{DocketConfig, FeedSection, LoggingSection, ServerSection, TenantEntry};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults and one tenant
    Init {
        /// Create project-local config (./docket.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Id of the tenant to create
        #[arg(long, default_value = "default")]
        tenant: String,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local, tenant } => cmd_init(ctx, local, &tenant),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let config = &loaded.config;

    println!("# Docket Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        for source in sources {
            println!("# loaded: {}", source.display());
        }
        println!();
    }

    // Print effective sections so defaults are visible; tokens are redacted.
    let mut effective = DocketConfig {
        server: Some(config.server()),
        feed: Some(config.feed()),
        storage: config.storage.clone(),
        logging: Some(config.logging()),
        tenants: config.tenants.clone(),
    };
    for tenant in &mut effective.tenants {
        tenant.token = "********".to_string();
    }
    print!("{}", effective.to_toml()?);
    println!("\n# database: {}", loaded.database_path().display());

    if let Err(e) = config.validate() {
        println!("# invalid: {}", e);
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    println!("Config files (lowest precedence first):");
    for source in &ctx.loaded.sources {
        let status = if source.loaded { "loaded" } else { "not found" };
        println!("  {} ({})", source.path.display(), status);
    }
    Ok(())
}

fn cmd_init(ctx: &Context, local: bool, tenant: &str) -> Result<()> {
    let path = if local {
        PathBuf::from(docket_config::PROJECT_CONFIG_FILE)
    } else {
        match ctx.loaded.user_config_path() {
            Some(path) => path,
            None => bail!("could not determine the user config directory"),
        }
    };
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let config = DocketConfig {
        server: Some(ServerSection::default()),
        feed: Some(FeedSection::default()),
        storage: None,
        logging: Some(LoggingSection::default()),
        tenants: vec![TenantEntry {
            id: tenant.to_string(),
            token: uuid::Uuid::new_v4().simple().to_string(),
        }],
    };
    docket_config::save_config(&config, &path)?;

    println!("Wrote {}", path.display());
    println!("Tenant '{}' token: {}", tenant, config.tenants[0].token);
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    match ctx.loaded.user_config_path() {
        Some(path) => println!("{}", path.display()),
        None => bail!("could not determine the user config directory"),
    }
    Ok(())
}
