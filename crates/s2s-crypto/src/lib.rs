//! # s2s-crypto
//!
//! Cryptographic primitives for the s2s proxy, built on aws-lc-rs.
//!
//! SAML 2.0 deployments still rely on SHA-256 and RSA PKCS#1 v1.5 signatures,
//! so both are supported here alongside the stronger SHA-384/512 variants.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod hash;
pub mod random;
pub mod rsa;

pub use error::{CryptoError, CryptoResult};
pub use hash::{digest, sha256, sha384, sha512, HashAlgorithm};
pub use random::{generate_state_key, random_alphanumeric, random_base64url, random_bytes};
pub use rsa::{rsa_sign, rsa_verify, RsaAlgorithm};
