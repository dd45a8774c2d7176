//! SAML Response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Assertion, AttributeMap, AuthnContext, NameId, Status};

/// SAML Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Unique identifier for this response.
    pub id: String,

    /// ID of the request this response answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// When the response was issued.
    pub issue_instant: DateTime<Utc>,

    /// Entity ID of the responder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// URL the response was sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Response status.
    pub status: Status,

    /// Assertions in document order.
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl Response {
    /// Creates a success response with a random ID.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self {
            id: format!("_{}", uuid::Uuid::new_v4().simple()),
            in_response_to: None,
            issue_instant: Utc::now(),
            issuer: Some(issuer.into()),
            destination: None,
            status: Status::success(),
            assertions: Vec::new(),
        }
    }

    /// Sets the request ID this response answers.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Appends an assertion.
    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Returns true if the status is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the first assertion.
    #[must_use]
    pub fn first_assertion(&self) -> Option<&Assertion> {
        self.assertions.first()
    }

    /// Returns the subject NameID of the first assertion carrying one.
    #[must_use]
    pub fn subject(&self) -> Option<&NameId> {
        self.assertions
            .iter()
            .find_map(|a| a.subject.as_ref().and_then(|s| s.name_id.as_ref()))
    }

    /// Returns the authentication contexts of all statements, in document order.
    #[must_use]
    pub fn authn_info(&self) -> Vec<&AuthnContext> {
        self.assertions
            .iter()
            .flat_map(|a| a.authn_statements.iter().map(|s| &s.context))
            .collect()
    }

    /// Returns the responder's identity: the response issuer, or else the
    /// first assertion's issuer.
    #[must_use]
    pub fn asserting_issuer(&self) -> Option<&str> {
        self.issuer
            .as_deref()
            .or_else(|| self.first_assertion().map(|a| a.issuer.as_str()))
    }

    /// Collects the released attributes of all attribute statements.
    ///
    /// Values of attributes repeated across statements are appended in
    /// document order.
    #[must_use]
    pub fn attributes(&self) -> AttributeMap {
        let mut map = AttributeMap::new();
        for attribute in self
            .assertions
            .iter()
            .flat_map(|a| a.attribute_statements.iter())
            .flat_map(|s| s.attributes.iter())
        {
            map.entry(attribute.name.clone())
                .or_default()
                .extend(attribute.values.iter().cloned());
        }
        map
    }
}
