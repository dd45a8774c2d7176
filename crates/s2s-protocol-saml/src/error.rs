//! SAML error types.

use thiserror::Error;

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// SAML protocol errors.
#[derive(Debug, Error)]
pub enum SamlError {
    /// Invalid SAML request format or content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid SAML response format or content.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// XML signature validation failed.
    #[error("signature validation failed: {0}")]
    SignatureInvalid(String),

    /// XML signature creation failed.
    #[error("signature creation failed: {0}")]
    SignatureCreation(String),

    /// Missing required element or attribute.
    #[error("missing required element: {0}")]
    MissingElement(String),

    /// Assertion conditions not met.
    #[error("assertion conditions not met: {0}")]
    ConditionsNotMet(String),

    /// Assertion expired.
    #[error("assertion expired")]
    AssertionExpired,

    /// Assertion not yet valid.
    #[error("assertion not yet valid")]
    AssertionNotYetValid,

    /// Invalid audience.
    #[error("invalid audience: expected {expected}")]
    InvalidAudience {
        /// The expected audience URI.
        expected: String,
    },

    /// Invalid destination.
    #[error("invalid destination: expected one of our endpoints, got {actual}")]
    InvalidDestination {
        /// The actual destination URL.
        actual: String,
    },

    /// The upstream party answered with a non-success status.
    #[error("non-success status: {code}")]
    StatusNotSuccess {
        /// The top-level status code URI.
        code: String,
        /// Optional status message.
        message: Option<String>,
    },

    /// Unknown or unsupported binding.
    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// Base64 decoding error.
    #[error("base64 decode error: {0}")]
    Base64Decode(String),

    /// Deflate decompression error.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// Unknown service provider.
    #[error("unknown service provider: {0}")]
    UnknownServiceProvider(String),

    /// Unknown identity provider.
    #[error("unknown identity provider: {0}")]
    UnknownIdentityProvider(String),

    /// Malformed or missing entity configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cryptographic operation error.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl SamlError {
    /// Returns the SAML status code for this error.
    #[must_use]
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_)
            | Self::MissingElement(_)
            | Self::XmlParse(_)
            | Self::Base64Decode(_)
            | Self::Deflate(_)
            | Self::SignatureInvalid(_)
            | Self::ConditionsNotMet(_)
            | Self::AssertionExpired
            | Self::AssertionNotYetValid
            | Self::InvalidAudience { .. }
            | Self::InvalidDestination { .. } => "urn:oasis:names:tc:SAML:2.0:status:Requester",
            Self::UnknownServiceProvider(_) | Self::UnknownIdentityProvider(_) => {
                "urn:oasis:names:tc:SAML:2.0:status:UnknownPrincipal"
            }
            Self::UnsupportedBinding(_) => "urn:oasis:names:tc:SAML:2.0:status:RequestUnsupported",
            _ => "urn:oasis:names:tc:SAML:2.0:status:Responder",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidResponse(_)
            | Self::MissingElement(_)
            | Self::Base64Decode(_)
            | Self::Deflate(_)
            | Self::XmlParse(_)
            | Self::UnsupportedBinding(_)
            | Self::InvalidDestination { .. } => 400,
            Self::SignatureInvalid(_)
            | Self::ConditionsNotMet(_)
            | Self::AssertionExpired
            | Self::AssertionNotYetValid
            | Self::InvalidAudience { .. } => 401,
            Self::UnknownServiceProvider(_) | Self::UnknownIdentityProvider(_) => 403,
            Self::StatusNotSuccess { .. } => 502,
            _ => 500,
        }
    }
}

impl From<quick_xml::Error> for SamlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SamlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64Decode(err.to_string())
    }
}

impl From<s2s_crypto::CryptoError> for SamlError {
    fn from(err: s2s_crypto::CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}
