//! End-to-end tests.
//!
//! The proxy is built from the configuration under `fixtures/` and driven
//! in-process through its axum router. The upstream identity provider is
//! simulated by signing responses with the fixture upstream key.

mod common;
mod relay_flows;
mod routing;
