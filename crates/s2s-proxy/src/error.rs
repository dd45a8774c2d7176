//! Proxy error types.

use axum::http::StatusCode;
use s2s_protocol_saml::SamlError;
use thiserror::Error;

use crate::attributes::AttributeError;
use crate::config::ConfigError;
use crate::router::RouterError;
use crate::store::StoreError;

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors raised while serving a handshake step.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No route matches the request path.
    #[error("no route for path: {0}")]
    RouteNotFound(String),

    /// The request path tried to climb out of the served tree.
    #[error("path traversal attempt: {0}")]
    PathTraversalAttempt(String),

    /// The correlation token is missing, unknown or already used.
    #[error("unknown correlation token: {0}")]
    UnknownCorrelationToken(String),

    /// No local identity record matches the inbound attributes.
    #[error("no matching identity for the authenticated subject")]
    NoMatchingIdentity,

    /// The request is well-formed HTTP but cannot be served.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Startup configuration is invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Route table construction failed.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// SAML protocol failure.
    #[error(transparent)]
    Saml(#[from] SamlError),

    /// Correlation store failure.
    #[error(transparent)]
    Store(StoreError),

    /// Attribute module failure.
    #[error(transparent)]
    Attribute(AttributeError),
}

impl ProxyError {
    /// HTTP status used when the error is turned into a response.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::PathTraversalAttempt(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Saml(err) => {
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::UnknownCorrelationToken(_)
            | Self::NoMatchingIdentity
            | Self::Configuration(_)
            | Self::Router(_)
            | Self::Store(_)
            | Self::Attribute(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::UnknownCorrelationToken(key),
            other => Self::Store(other),
        }
    }
}

impl From<AttributeError> for ProxyError {
    fn from(err: AttributeError) -> Self {
        match err {
            AttributeError::NoMatchingIdentity => Self::NoMatchingIdentity,
            other => Self::Attribute(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ProxyError::RouteNotFound("x".into()).http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::PathTraversalAttempt("../x".into()).http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProxyError::UnknownCorrelationToken("_k".into()).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::Saml(SamlError::UnknownServiceProvider("sp".into())).http_status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn store_not_found_becomes_unknown_token() {
        let err: ProxyError = StoreError::NotFound("_abc".into()).into();
        assert!(matches!(err, ProxyError::UnknownCorrelationToken(ref k) if k == "_abc"));
    }

    #[test]
    fn no_matching_identity_is_surfaced() {
        let err: ProxyError = AttributeError::NoMatchingIdentity.into();
        assert!(matches!(err, ProxyError::NoMatchingIdentity));
    }
}
