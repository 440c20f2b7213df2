//! subgate: subdomain-routing reverse proxy
//!
//! Routes each request by the first label of its Host to a static CDN,
//! a serverless function host or a dynamic projects host, using a
//! cache-aside lookup against the app-type registry. Built on Cloudflare's
//! Pingora framework.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use pingora::prelude::*;
use pingora_core::server::configuration::ServerConf;
use pingora_proxy::http_proxy_service;
use proxy::{metrics, wait_for_connections_drain, Dispatcher, HttpRegistry, RouteResolver, SubgateProxy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "subgate")]
#[command(author, version, about = "Subdomain-routing reverse proxy")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional TOML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(short, long)]
    test: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Some(Commands::Validate { config }) => validate_config(config.or(cli.config)),
        Some(Commands::Run { config }) => run_server(config.or(cli.config)),
        None => {
            if cli.test {
                validate_config(cli.config)
            } else {
                run_server(cli.config)
            }
        }
    }
}

fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    Config::load_with_env(config_path.map(PathBuf::as_path)).with_context(|| match config_path {
        Some(path) => format!("Failed to load config from {:?}", path),
        None => "Failed to load config from environment".to_string(),
    })
}

#[allow(unreachable_code)]
fn run_server(config_path: Option<PathBuf>) -> Result<()> {
    info!("Starting subgate");
    let config = load_config(config_path.as_ref())?;
    info!(
        listen = %config.server.listen,
        overrides = config.overrides.len(),
        redis = config.cache.url.is_some(),
        "Configuration loaded"
    );

    // This runtime owns the cache and registry connections opened before the
    // server starts and must outlive it.
    let rt = tokio::runtime::Runtime::new()?;

    let cache = rt
        .block_on(proxy::cache::from_config(&config.cache))
        .context("Failed to create cache client")?;
    let registry =
        HttpRegistry::from_config(&config.registry).context("Failed to create registry client")?;
    let resolver = RouteResolver::new(cache, Arc::new(registry)).with_ttls(&config.cache);
    let dispatcher =
        Dispatcher::from_config(&config, resolver).context("Invalid backend configuration")?;
    let proxy = SubgateProxy::new(dispatcher, config.upstream.clone());

    match rt.block_on(proxy.preload()) {
        Some(entries) => info!(entries, "Cache warm"),
        None => warn!("Starting with a cold cache"),
    }

    let mut server_conf = ServerConf::default();
    server_conf.upstream_keepalive_pool_size = config.upstream.pool_size;
    let mut server = Server::new_with_opt_and_conf(None, server_conf);
    server.bootstrap();

    let mut service = http_proxy_service(&server.configuration, proxy);
    service.add_tcp(&config.server.listen);
    info!(address = %config.server.listen, "Listening (HTTP)");
    server.add_service(service);

    let grace_period = Duration::from_secs(config.server.grace_period);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, initiating graceful shutdown...");

        info!(grace_period_secs = grace_period.as_secs(), "Waiting for requests to drain...");
        if wait_for_connections_drain(grace_period) {
            info!("All requests drained");
        } else {
            warn!("Grace period expired, some requests may be terminated");
        }

        metrics().log_summary();
        info!("Shutdown complete");
        std::process::exit(0);
    })
    .ok();

    info!("subgate started successfully");
    server.run_forever();

    drop(rt);
    Ok(())
}

fn validate_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_ref())?;

    println!("Configuration is valid!");
    println!("  Listen: {}", config.server.listen);
    println!("  CDN: {}", config.backends.cdn_url);
    println!("  Serverless base: {}", config.backends.serverless_base_url);
    println!("  Dynamic projects: {}", config.backends.dynamic_projects_url);
    println!("  Registry: {}", config.registry.api_server_url);
    println!(
        "  Cache: {}",
        if config.cache.url.is_some() { "redis" } else { "in-process" }
    );
    println!("  Upstream pool size: {}", config.upstream.pool_size);

    for rule in &config.overrides {
        println!("  Override: {} -> {}", rule.host, rule.target);
    }

    Ok(())
}
