//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// SAML-to-SAML bridging proxy.
#[derive(Debug, Parser)]
#[command(name = "s2s-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Return errors to the client instead of a generic error page.
    #[arg(short, long, env = "S2S_DEBUG")]
    pub debug: bool,

    /// Fixed upstream identity provider (overrides config).
    #[arg(short = 'e', long, env = "S2S_ENTITY_ID")]
    pub entity_id: Option<String>,

    /// Proxy configuration file.
    pub proxy_config: PathBuf,

    /// Server configuration file.
    pub server_config: PathBuf,
}
