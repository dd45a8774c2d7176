//! # s2s-protocol-saml
//!
//! SAML 2.0 protocol support for the s2s proxy.
//!
//! The proxy plays both roles of the Web Browser SSO profile: it is an
//! identity provider towards downstream service providers and a service
//! provider towards upstream identity providers. This crate supplies what
//! both roles need from the protocol:
//!
//! - **Types**: `AuthnRequest`, `Response`, `Assertion` and their parts
//! - **XML**: parsing and serialization of those messages
//! - **Bindings**: HTTP-POST and HTTP-Redirect
//! - **Signatures**: enveloped XML-DSig creation and validation
//! - **Configuration**: entity configuration and trusted metadata from TOML
//! - **Validation**: acceptance checks for inbound requests and responses

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod config;
pub mod error;
pub mod signature;
pub mod types;
pub mod validation;
pub mod xml;

pub use config::{
    Endpoint, EndpointKind, EntityConfig, EntityRole, RemoteEntity, SamlConfigDocument,
    TrustedMetadata,
};
pub use error::{SamlError, SamlResult};
pub use types::*;
