//! SAML Assertion types.
//!
//! Assertions contain statements about a subject made by an issuer.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{attribute_name_formats, NameId, CM_BEARER};
use crate::error::{SamlError, SamlResult};

/// Attribute name to ordered values, as released in an assertion.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// SAML Assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Unique identifier for this assertion.
    pub id: String,

    /// When the assertion was issued.
    pub issue_instant: DateTime<Utc>,

    /// Entity ID of the asserting party.
    pub issuer: String,

    /// The subject of this assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,

    /// Validity conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,

    /// Authentication statements, in document order.
    #[serde(default)]
    pub authn_statements: Vec<AuthnStatement>,

    /// Attribute statements, in document order.
    #[serde(default)]
    pub attribute_statements: Vec<AttributeStatement>,
}

impl Assertion {
    /// Creates a new assertion with a random ID.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: format!("_{}", uuid::Uuid::new_v4().simple()),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            subject: None,
            conditions: None,
            authn_statements: Vec::new(),
            attribute_statements: Vec::new(),
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Sets the conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Appends an authentication statement.
    #[must_use]
    pub fn with_authn_statement(mut self, statement: AuthnStatement) -> Self {
        self.authn_statements.push(statement);
        self
    }

    /// Appends an attribute statement.
    #[must_use]
    pub fn with_attribute_statement(mut self, statement: AttributeStatement) -> Self {
        self.attribute_statements.push(statement);
        self
    }

    /// Validates the time window and audience restriction.
    ///
    /// `skew` widens the validity window on both ends. An assertion without
    /// `Conditions` is rejected.
    ///
    /// # Errors
    ///
    /// Returns `ConditionsNotMet`, `AssertionNotYetValid`, `AssertionExpired`
    /// or `InvalidAudience`.
    pub fn validate(&self, audience: &str, now: DateTime<Utc>, skew: Duration) -> SamlResult<()> {
        let conditions = self
            .conditions
            .as_ref()
            .ok_or_else(|| SamlError::ConditionsNotMet("assertion has no Conditions".to_string()))?;

        if let Some(not_before) = conditions.not_before {
            if now + skew < not_before {
                return Err(SamlError::AssertionNotYetValid);
            }
        }
        if let Some(not_on_or_after) = conditions.not_on_or_after {
            if now - skew >= not_on_or_after {
                return Err(SamlError::AssertionExpired);
            }
        }
        if !conditions.audiences.is_empty() && !conditions.audiences.iter().any(|a| a == audience) {
            return Err(SamlError::InvalidAudience {
                expected: audience.to_string(),
            });
        }
        Ok(())
    }

    /// Checks that a bearer confirmation lets this assertion be delivered
    /// to us now, in answer to `in_response_to`.
    ///
    /// One bearer confirmation must name a recipient accepted by
    /// `is_recipient`, carry the same `InResponseTo` and not have expired.
    ///
    /// # Errors
    ///
    /// Returns `ConditionsNotMet` when there is no bearer confirmation, else
    /// the failure of the first one.
    pub fn validate_bearer(
        &self,
        is_recipient: impl Fn(&str) -> bool,
        in_response_to: Option<&str>,
        now: DateTime<Utc>,
        skew: Duration,
    ) -> SamlResult<()> {
        let mut first_error = None;
        let bearers = self
            .subject
            .iter()
            .flat_map(|subject| &subject.confirmations)
            .filter(|confirmation| confirmation.method == CM_BEARER);
        for confirmation in bearers {
            match confirmation.check_bearer(&is_recipient, in_response_to, now, skew) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| {
            SamlError::ConditionsNotMet("no bearer subject confirmation".to_string())
        }))
    }
}

/// Subject of an assertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// The subject's name identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_id: Option<NameId>,

    /// Subject confirmations.
    #[serde(default)]
    pub confirmations: Vec<SubjectConfirmation>,
}

impl Subject {
    /// Creates a subject with the given name ID.
    #[must_use]
    pub fn new(name_id: NameId) -> Self {
        Self {
            name_id: Some(name_id),
            confirmations: Vec::new(),
        }
    }

    /// Adds a subject confirmation.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: SubjectConfirmation) -> Self {
        self.confirmations.push(confirmation);
        self
    }
}

/// Subject confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmation {
    /// Confirmation method URI.
    pub method: String,

    /// Confirmation data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SubjectConfirmationData>,
}

impl SubjectConfirmation {
    /// Creates a bearer confirmation for a response delivered to `recipient`.
    #[must_use]
    pub fn bearer(
        recipient: impl Into<String>,
        in_response_to: Option<String>,
        validity_minutes: i64,
    ) -> Self {
        Self {
            method: CM_BEARER.to_string(),
            data: Some(SubjectConfirmationData {
                recipient: Some(recipient.into()),
                in_response_to,
                not_on_or_after: Some(Utc::now() + Duration::minutes(validity_minutes)),
            }),
        }
    }

    fn check_bearer(
        &self,
        is_recipient: impl Fn(&str) -> bool,
        in_response_to: Option<&str>,
        now: DateTime<Utc>,
        skew: Duration,
    ) -> SamlResult<()> {
        let data = self.data.as_ref().ok_or_else(|| {
            SamlError::ConditionsNotMet("bearer confirmation without data".to_string())
        })?;

        match data.recipient.as_deref() {
            Some(recipient) if is_recipient(recipient) => {}
            other => {
                return Err(SamlError::ConditionsNotMet(format!(
                    "bearer recipient {other:?} is not an assertion consumer"
                )))
            }
        }
        if data.in_response_to.as_deref() != in_response_to {
            return Err(SamlError::ConditionsNotMet(format!(
                "bearer InResponseTo {:?} does not match the response",
                data.in_response_to
            )));
        }
        let not_on_or_after = data.not_on_or_after.ok_or_else(|| {
            SamlError::ConditionsNotMet("bearer confirmation without NotOnOrAfter".to_string())
        })?;
        if now - skew >= not_on_or_after {
            return Err(SamlError::AssertionExpired);
        }
        Ok(())
    }
}

/// Subject confirmation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmationData {
    /// Where the assertion may be delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// The request this assertion answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// Expiry of the confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,
}

/// Assertion conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Start of validity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// End of validity (exclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Audiences from all audience restrictions.
    #[serde(default)]
    pub audiences: Vec<String>,
}

impl Conditions {
    /// Creates conditions valid from now for the given number of minutes.
    #[must_use]
    pub fn with_validity(minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            not_before: Some(now),
            not_on_or_after: Some(now + Duration::minutes(minutes)),
            audiences: Vec::new(),
        }
    }

    /// Adds an audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.push(audience.into());
        self
    }
}

/// Authentication statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnStatement {
    /// When the subject authenticated.
    pub authn_instant: DateTime<Utc>,

    /// Session index at the asserting party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,

    /// How the subject authenticated.
    pub context: AuthnContext,
}

impl AuthnStatement {
    /// Creates a statement for an authentication that happened now.
    #[must_use]
    pub fn new(context: AuthnContext) -> Self {
        Self {
            authn_instant: Utc::now(),
            session_index: None,
            context,
        }
    }

    /// Sets the session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_index = Some(index.into());
        self
    }
}

/// Authentication context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnContext {
    /// AuthnContextClassRef.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<String>,

    /// AuthenticatingAuthority values, in document order.
    #[serde(default)]
    pub authenticating_authorities: Vec<String>,
}

impl AuthnContext {
    /// Creates a context with the given class reference.
    #[must_use]
    pub fn new(class_ref: impl Into<String>) -> Self {
        Self {
            class_ref: Some(class_ref.into()),
            authenticating_authorities: Vec::new(),
        }
    }

    /// Adds an authenticating authority.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authenticating_authorities.push(authority.into());
        self
    }
}

/// Attribute statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeStatement {
    /// Attributes in document order.
    pub attributes: Vec<Attribute>,
}

impl AttributeStatement {
    /// Builds a statement from an attribute map, using the URI name format.
    #[must_use]
    pub fn from_map(map: &AttributeMap) -> Self {
        Self {
            attributes: map
                .iter()
                .map(|(name, values)| Attribute {
                    name: name.clone(),
                    name_format: Some(attribute_name_formats::URI.to_string()),
                    friendly_name: None,
                    values: values.clone(),
                })
                .collect(),
        }
    }
}

/// A named, multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,

    /// Name format URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_format: Option<String>,

    /// Friendly name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,

    /// Values in document order.
    #[serde(default)]
    pub values: Vec<String>,
}

impl Attribute {
    /// Creates an attribute with the basic name format.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            name_format: Some(attribute_name_formats::BASIC.to_string()),
            friendly_name: None,
            values,
        }
    }
}
