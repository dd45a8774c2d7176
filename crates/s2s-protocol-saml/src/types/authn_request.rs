//! Authentication requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NameIdPolicy, SamlBinding};
use crate::error::{SamlError, SamlResult};

/// SAML AuthnRequest.
///
/// The proxy receives these from downstream service providers and issues
/// its own, with the correlation token as ID, to the upstream identity
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// SAML version, always "2.0".
    pub version: String,

    /// When the request was issued.
    pub issue_instant: DateTime<Utc>,

    /// Entity ID of the requester.
    pub issuer: String,

    /// URL the request was sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// URL where the response should be delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_consumer_service_url: Option<String>,

    /// Binding URI the response should use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_binding: Option<String>,

    /// Requested name ID policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_id_policy: Option<NameIdPolicy>,

    /// Whether the IdP must re-authenticate the user.
    #[serde(default)]
    pub force_authn: bool,

    /// Whether the IdP must not interact with the user.
    #[serde(default)]
    pub is_passive: bool,
}

impl AuthnRequest {
    /// Creates a new request with a random ID.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self::with_id(format!("_{}", uuid::Uuid::new_v4().simple()), issuer)
    }

    /// Creates a new request with the given ID.
    #[must_use]
    pub fn with_id(id: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: "2.0".to_string(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            assertion_consumer_service_url: None,
            protocol_binding: None,
            name_id_policy: None,
            force_authn: false,
            is_passive: false,
        }
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the assertion consumer service URL.
    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    /// Sets the response binding.
    #[must_use]
    pub fn with_binding(mut self, binding: SamlBinding) -> Self {
        self.protocol_binding = Some(binding.uri().to_string());
        self
    }

    /// Sets the name ID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Returns the requested response binding, if recognised.
    #[must_use]
    pub fn requested_binding(&self) -> Option<SamlBinding> {
        self.protocol_binding.as_deref().and_then(SamlBinding::from_uri)
    }

    /// Checks the structural requirements of a request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a wrong version or an empty ID/issuer.
    pub fn validate(&self) -> SamlResult<()> {
        if self.version != "2.0" {
            return Err(SamlError::InvalidRequest(format!(
                "unsupported SAML version: {}",
                self.version
            )));
        }
        if self.id.is_empty() {
            return Err(SamlError::InvalidRequest("empty request ID".to_string()));
        }
        if self.issuer.is_empty() {
            return Err(SamlError::InvalidRequest("missing Issuer".to_string()));
        }
        Ok(())
    }
}
