//! Acceptance checks for inbound messages.
//!
//! [`validate_response`] is what the SP role runs on a response posted by an
//! upstream identity provider. [`accept_authn_request`] is what the IdP role
//! runs on a request from a downstream service provider.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{EndpointKind, EntityConfig};
use crate::error::{SamlError, SamlResult};
use crate::types::{AuthnRequest, Response, SamlBinding};
use crate::xml::parse_response;

/// Where and how to answer an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTarget {
    /// Entity ID of the requesting service provider.
    pub sp_entity_id: String,
    /// Assertion consumer URL to deliver the response to.
    pub destination: String,
    /// Binding of that assertion consumer endpoint.
    pub binding: SamlBinding,
}

/// Parses and validates a response received by the SP role.
///
/// Checks, in order: status, issuer trust, destination, signature over the
/// Response or an Assertion, presence of an assertion, then each
/// assertion's conditions and bearer subject confirmation.
///
/// # Errors
///
/// Returns the first failed check as a `SamlError`.
pub fn validate_response(xml: &str, config: &EntityConfig, now: DateTime<Utc>) -> SamlResult<Response> {
    let response = parse_response(xml)?;

    if !response.is_success() {
        return Err(SamlError::StatusNotSuccess {
            code: response.status.code.clone(),
            message: response.status.message.clone(),
        });
    }

    let issuer = response
        .asserting_issuer()
        .ok_or_else(|| SamlError::MissingElement("Issuer".to_string()))?;
    let idp = config
        .metadata
        .identity_provider(issuer)
        .ok_or_else(|| SamlError::UnknownIdentityProvider(issuer.to_string()))?;

    if let Some(destination) = &response.destination {
        if !config.has_endpoint_url(EndpointKind::AssertionConsumer, destination) {
            return Err(SamlError::InvalidDestination {
                actual: destination.clone(),
            });
        }
    }

    let signature = idp.signature_validator().validate(xml)?;
    let signed_id = signature.reference_id();
    let covers_response = signed_id == response.id;
    if !covers_response && !response.assertions.iter().any(|a| a.id == signed_id) {
        return Err(SamlError::SignatureInvalid(format!(
            "signature references unknown element '{signed_id}'"
        )));
    }
    if !covers_response && response.assertions.len() > 1 {
        return Err(SamlError::SignatureInvalid(
            "only one of several assertions is signed".to_string(),
        ));
    }

    if response.assertions.is_empty() {
        return Err(SamlError::MissingElement("Assertion".to_string()));
    }
    let is_consumer = |url: &str| config.has_endpoint_url(EndpointKind::AssertionConsumer, url);
    for assertion in &response.assertions {
        assertion.validate(&config.entity_id, now, config.accepted_time_diff)?;
        assertion.validate_bearer(
            is_consumer,
            response.in_response_to.as_deref(),
            now,
            config.accepted_time_diff,
        )?;
    }

    debug!(
        response_id = %response.id,
        issuer = %issuer,
        signed_element = %signed_id,
        "upstream response accepted"
    );
    Ok(response)
}

/// Accepts an authentication request received by the IdP role and resolves
/// where the eventual response must go.
///
/// A requested assertion consumer URL must be registered for the service
/// provider; without one the first registered endpoint is used.
///
/// # Errors
///
/// Returns `UnknownServiceProvider` for an untrusted issuer,
/// `InvalidDestination` when the request was addressed elsewhere, and
/// `InvalidRequest` for an unregistered assertion consumer URL.
pub fn accept_authn_request(request: &AuthnRequest, config: &EntityConfig) -> SamlResult<ResponseTarget> {
    let sp = config
        .metadata
        .service_provider(&request.issuer)
        .ok_or_else(|| SamlError::UnknownServiceProvider(request.issuer.clone()))?;

    if let Some(destination) = &request.destination {
        if !config.has_endpoint_url(EndpointKind::SingleSignOn, destination) {
            return Err(SamlError::InvalidDestination {
                actual: destination.clone(),
            });
        }
    }

    let requested_binding = request.requested_binding();
    let endpoint = match &request.assertion_consumer_service_url {
        Some(url) => {
            let mut candidates = sp.assertion_consumer_service.iter().filter(|e| &e.url == url);
            let first = candidates.clone().next();
            requested_binding
                .and_then(|b| candidates.find(|e| e.binding == b))
                .or(first)
                .ok_or_else(|| {
                    SamlError::InvalidRequest(format!(
                        "assertion consumer URL {url} is not registered for {}",
                        sp.entity_id
                    ))
                })?
        }
        None => requested_binding
            .and_then(|b| sp.assertion_consumer_service.iter().find(|e| e.binding == b))
            .or_else(|| sp.assertion_consumer_service.first())
            .ok_or_else(|| {
                SamlError::Configuration(format!(
                    "no assertion consumer service registered for {}",
                    sp.entity_id
                ))
            })?,
    };

    Ok(ResponseTarget {
        sp_entity_id: sp.entity_id.clone(),
        destination: endpoint.url.clone(),
        binding: endpoint.binding,
    })
}
