//! # s2s-proxy
//!
//! Entry point of the SAML-to-SAML bridging proxy.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use s2s_proxy::attributes::AttributeModuleRegistry;
use s2s_proxy::cli::Cli;
use s2s_proxy::config::{ProxyConfig, ServerConfig};
use s2s_proxy::server::Server;
use s2s_proxy::{store, Proxy, ProxyContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let proxy_config = ProxyConfig::load(&cli.proxy_config)
        .with_context(|| format!("loading {}", cli.proxy_config.display()))?;
    let server_config = ServerConfig::load(&cli.server_config)
        .with_context(|| format!("loading {}", cli.server_config.display()))?;

    tracing::info!("s2s-proxy starting...");

    let store = store::connect(&server_config.store)
        .await
        .context("connecting correlation store")?;
    let registry = AttributeModuleRegistry::with_builtin();
    let context = ProxyContext::build(&proxy_config, store, &registry, cli.debug, cli.entity_id)?;
    let proxy = Arc::new(Proxy::from_context(context)?);

    Server::new(server_config, proxy).run().await
}
