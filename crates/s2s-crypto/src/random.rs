//! Cryptographically secure random generation.
//!
//! Used for correlation tokens (`state_key`), SAML message IDs and
//! other values that must be unguessable.

use base64::Engine;
use rand::distr::{Alphanumeric, SampleString};
use rand::Rng;

/// Number of random bytes behind a correlation token (256 bits).
pub const STATE_KEY_BYTES: usize = 32;

/// Generates `len` cryptographically secure random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Generates a random alphanumeric string of `len` characters.
#[must_use]
pub fn random_alphanumeric(len: usize) -> String {
    let mut rng = rand::rng();
    Alphanumeric.sample_string(&mut rng, len)
}

/// Generates a URL-safe base64 (no padding) string from `byte_len` random bytes.
#[must_use]
pub fn random_base64url(byte_len: usize) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes(byte_len))
}

/// Generates a correlation token linking the two legs of a relay handshake.
///
/// The token is `_` followed by base64url text, so it is also a valid
/// `xs:ID` and can be used directly as a SAML request ID.
#[must_use]
pub fn generate_state_key() -> String {
    format!("_{}", random_base64url(STATE_KEY_BYTES))
}
