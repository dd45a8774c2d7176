//! SAML bindings implementation.
//!
//! - **HTTP-POST Binding**: messages are base64-encoded and sent in an
//!   auto-submitting HTML form
//! - **HTTP-Redirect Binding**: messages are deflated, base64-encoded and
//!   URL-encoded into the query string

mod post;
mod redirect;

pub use post::*;
pub use redirect::*;

use crate::error::{SamlError, SamlResult};
use crate::types::SamlBinding;

/// SAML message type for binding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlMessageType {
    /// AuthnRequest message.
    Request,
    /// Response message.
    Response,
}

impl SamlMessageType {
    /// Returns the form parameter name for this message type.
    #[must_use]
    pub const fn form_param(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// Decoded SAML binding message.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// The decoded XML message.
    pub xml: String,
    /// The message type (request or response).
    pub message_type: SamlMessageType,
    /// The RelayState if present.
    pub relay_state: Option<String>,
}

impl DecodedMessage {
    /// Fails unless the message is of the expected type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when, for example, a response was posted to
    /// an endpoint expecting requests.
    pub fn require(self, message_type: SamlMessageType) -> SamlResult<Self> {
        if self.message_type == message_type {
            Ok(self)
        } else {
            Err(SamlError::InvalidRequest(format!(
                "expected {} parameter",
                message_type.form_param()
            )))
        }
    }
}

/// An encoded outbound message, ready to be turned into an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Redirect the browser to this URL.
    Redirect(String),
    /// Serve this auto-submitting HTML form.
    PostForm(String),
}

impl OutboundMessage {
    /// Encodes `xml` for `destination` using `binding`.
    ///
    /// # Errors
    ///
    /// Returns an error if redirect encoding fails.
    pub fn encode(
        binding: SamlBinding,
        message_type: SamlMessageType,
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
    ) -> SamlResult<Self> {
        match binding {
            SamlBinding::HttpRedirect => Ok(Self::Redirect(HttpRedirectBinding::encode(
                xml,
                destination,
                relay_state,
                message_type,
            )?)),
            SamlBinding::HttpPost => Ok(Self::PostForm(HttpPostBinding::encode(
                xml,
                destination,
                relay_state,
                message_type,
            ))),
        }
    }
}

/// Looks up a parameter by name in decoded key/value pairs.
#[must_use]
pub fn find_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Decodes a message received with `binding` from its parameters
/// (query pairs for redirect, form pairs for POST).
///
/// # Errors
///
/// Returns an error if no SAML parameter is present or decoding fails.
pub fn decode_params(binding: SamlBinding, params: &[(String, String)]) -> SamlResult<DecodedMessage> {
    let request = find_param(params, "SAMLRequest");
    let response = find_param(params, "SAMLResponse");
    let relay_state = find_param(params, "RelayState");
    match binding {
        SamlBinding::HttpRedirect => HttpRedirectBinding::decode(request, response, relay_state),
        SamlBinding::HttpPost => HttpPostBinding::decode(request, response, relay_state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_params_dispatches_on_binding() {
        let xml = "<samlp:Response/>";
        let OutboundMessage::PostForm(_) = OutboundMessage::encode(
            SamlBinding::HttpPost,
            SamlMessageType::Response,
            xml,
            "https://sp.example.com/acs",
            None,
        )
        .unwrap() else {
            panic!("expected a POST form");
        };

        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, xml);
        let params = vec![
            ("SAMLResponse".to_string(), encoded),
            ("RelayState".to_string(), "rs".to_string()),
        ];
        let decoded = decode_params(SamlBinding::HttpPost, &params).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.relay_state.as_deref(), Some("rs"));
        assert!(decoded.require(SamlMessageType::Request).is_err());
    }
}
