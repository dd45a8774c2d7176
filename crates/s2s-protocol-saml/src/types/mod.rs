//! SAML 2.0 types and data structures.
//!
//! Only the parts of the Web Browser SSO profile the proxy relays are
//! modelled: authentication requests, responses and their assertions.

mod assertion;
mod authn_request;
mod constants;
mod name_id;
mod response;
mod status;

pub use assertion::*;
pub use authn_request::*;
pub use constants::*;
pub use name_id::*;
pub use response::*;
pub use status::*;
