//! XML reading and writing for SAML messages.

pub(crate) mod dom;
mod reader;
mod writer;

pub use reader::{parse_authn_request, parse_response};
pub use writer::{write_authn_request, write_response};
