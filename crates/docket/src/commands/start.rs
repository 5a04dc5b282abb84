//! Start command - run the change stream server.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use docket_config::{DocketConfig, FeedSection};
use docket_feed::{FeedConfig, LifecycleManager};
use docket_server::{Server, ServerConfig};
use docket_store::standard_detectors;
use tracing::{info, warn};

use super::Context;

/// Arguments for the start command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Seconds between polls of one stream (overrides config)
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.loaded.config.clone();
    if let Some(secs) = args.poll_interval {
        let mut feed = config.feed();
        feed.poll_interval_secs = secs;
        config.feed = Some(feed);
    }
    config.validate().context("invalid configuration")?;

    let addr = bind_address(&config, &args)?;
    let server_config = server_config(&config, addr);
    if server_config.tenants.is_empty() {
        warn!("No tenants configured; every stream request will be rejected");
    }

    let feed_config = feed_config(&config.feed());
    if ctx.verbose {
        info!(?feed_config, "Feed configuration");
    }

    let store = ctx.open_store()?;
    info!(database = %ctx.loaded.database_path().display(), "Opened portal database");

    let feed = LifecycleManager::new(standard_detectors(store), feed_config);
    Server::new(server_config, feed)
        .run()
        .await
        .context("server exited with an error")?;
    Ok(())
}

fn bind_address(config: &DocketConfig, args: &StartArgs) -> Result<SocketAddr> {
    let server = config.server();
    let bind = args.bind.clone().unwrap_or(server.bind);
    let port = args.port.unwrap_or(server.port);
    let addr = format!("{}:{}", bind, port);
    match addr.parse() {
        Ok(addr) => Ok(addr),
        Err(_) => bail!("invalid bind address '{}'", addr),
    }
}

fn server_config(config: &DocketConfig, addr: SocketAddr) -> ServerConfig {
    let server = config.server();
    config.tenants.iter().fold(
        ServerConfig::new()
            .with_bind_address(addr)
            .with_rate_limiting(server.rate_limiting)
            .with_api_rpm(server.api_rpm)
            .with_request_logging(server.request_logging),
        |cfg, tenant| cfg.with_tenant(tenant.id.clone(), tenant.token.clone()),
    )
}

/// Translate the `[feed]` section into feed timings.
fn feed_config(section: &FeedSection) -> FeedConfig {
    FeedConfig::new()
        .with_poll_interval(Duration::from_secs(section.poll_interval_secs))
        .with_heartbeat_interval(Duration::from_secs(section.heartbeat_secs))
        .with_max_session_age(Duration::from_secs(section.max_session_age_secs))
        .with_sweep_interval(Duration::from_secs(section.sweep_interval_secs))
        .with_stale_after(Duration::from_secs(section.stale_after_secs))
        .with_page_size(section.page_size)
        .with_sink_buffer(section.sink_buffer)
        .with_max_streams_per_tenant(section.max_streams_per_tenant)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(bind: Option<&str>, port: Option<u16>) -> StartArgs {
        StartArgs {
            port,
            bind: bind.map(String::from),
            poll_interval: None,
        }
    }

    #[test]
    fn test_feed_config_from_section() {
        let section = FeedSection {
            poll_interval_secs: 2,
            heartbeat_secs: 10,
            page_size: 0,
            ..FeedSection::default()
        };
        let feed = feed_config(&section);
        assert_eq!(feed.poll_interval, Duration::from_secs(2));
        assert_eq!(feed.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(feed.max_session_age, Duration::from_secs(3600));
        assert_eq!(feed.page_size, 1);
    }

    #[test]
    fn test_bind_address_flags_override_config() {
        let config = DocketConfig::from_toml("[server]\nport = 9000\n").unwrap();
        assert_eq!(
            bind_address(&config, &args(None, None)).unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            bind_address(&config, &args(Some("0.0.0.0"), Some(7000))).unwrap(),
            "0.0.0.0:7000".parse::<SocketAddr>().unwrap()
        );
        assert!(bind_address(&config, &args(Some("not an address"), None)).is_err());
    }

    #[test]
    fn test_server_config_carries_tenants() {
        let config = DocketConfig::from_toml(
            r#"
[server]
rate_limiting = false

[[tenants]]
id = "acme"
token = "acme-token"
"#,
        )
        .unwrap();
        let server = server_config(&config, "127.0.0.1:8780".parse().unwrap());
        assert_eq!(server.tenants.len(), 1);
        assert_eq!(server.tenants[0].tenant_id.as_str(), "acme");
        assert!(!server.rate_limiting);
    }
}
