//! # s2s-proxy
//!
//! Orchestration core of a SAML-to-SAML bridging proxy.
//!
//! The proxy is an identity provider towards downstream service providers
//! and a service provider towards upstream identity providers. A request
//! enters through the [`router`], is handed to a freshly built role instance
//! from the [`entity`] factory, and the [`orchestrator`] relays the
//! handshake: the inbound leg stores a [`store::RelayRecord`] under an
//! opaque correlation token, and the outbound leg takes it back, runs the
//! configured [`attributes`] module and forges a signed response.
//!
//! ## Usage
//!
//! ```ignore
//! let context = ProxyContext::build(&proxy_config, store, &registry, false, None)?;
//! let proxy = Arc::new(Proxy::from_context(context)?);
//! let app = server::build_router(proxy, None);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod app;
pub mod attributes;
pub mod cli;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod router;
pub mod server;
pub mod store;

pub use app::Proxy;
pub use context::ProxyContext;
pub use error::{ProxyError, ProxyResult};
pub use http::{ProxyRequest, ProxyResponse};
