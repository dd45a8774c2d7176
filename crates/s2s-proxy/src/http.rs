//! Transport-neutral request and response.
//!
//! The axum layer turns each request into a [`ProxyRequest`] and each
//! [`ProxyResponse`] back into an HTTP response, so the router, role
//! instances and orchestrator never touch axum types.

use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use s2s_protocol_saml::bindings::OutboundMessage;
use s2s_protocol_saml::SamlBinding;

use crate::router::RouteArgs;

const NOT_FOUND_BODY: &str = "Couldn't find the side you asked for!";
const UNAUTHORIZED_BODY: &str = "Unauthorized";
const HTML: &str = "text/html; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";

/// Context of one inbound HTTP request.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    /// HTTP method.
    pub method: Method,
    /// Percent-decoded request path, leading `/` included. Bytes that do
    /// not decode to UTF-8 become U+FFFD.
    pub path: String,
    /// Decoded query pairs.
    pub query: Vec<(String, String)>,
    /// Decoded `application/x-www-form-urlencoded` body pairs.
    pub form: Vec<(String, String)>,
    /// Arguments captured by the matched route.
    pub route_args: Option<RouteArgs>,
}

impl ProxyRequest {
    /// Builds a request from its HTTP parts. The body is only read as a
    /// form for `POST`.
    #[must_use]
    pub fn from_parts(method: Method, uri: &Uri, body: &[u8]) -> Self {
        let decoded = urlencoding::decode_binary(uri.path().as_bytes());
        let path = String::from_utf8_lossy(&decoded).into_owned();
        let query = uri.query().map(|q| parse_pairs(q.as_bytes())).unwrap_or_default();
        let form = if method == Method::POST {
            parse_pairs(body)
        } else {
            Vec::new()
        };

        Self {
            method,
            path,
            query,
            form,
            route_args: None,
        }
    }

    /// Parameters carrying a SAML message received with `binding`.
    #[must_use]
    pub fn params(&self, binding: SamlBinding) -> &[(String, String)] {
        match binding {
            SamlBinding::HttpRedirect => &self.query,
            SamlBinding::HttpPost => &self.form,
        }
    }

    /// First query parameter named `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        s2s_protocol_saml::bindings::find_param(&self.query, name)
    }
}

fn parse_pairs(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

/// Outcome of a handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// `Content-Type` of the body.
    pub content_type: Option<&'static str>,
    /// `Location` header for redirects.
    pub location: Option<String>,
    /// Response body.
    pub body: String,
}

impl ProxyResponse {
    /// A `303 See Other` to `url`.
    #[must_use]
    pub fn redirect(url: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SEE_OTHER,
            content_type: None,
            location: Some(url.into()),
            body: String::new(),
        }
    }

    /// A `200 OK` HTML page.
    #[must_use]
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: Some(HTML),
            location: None,
            body: body.into(),
        }
    }

    /// Plain text with the given status.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some(TEXT),
            location: None,
            body: body.into(),
        }
    }

    /// The 404 page.
    #[must_use]
    pub fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
    }

    /// The 401 page.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::text(StatusCode::UNAUTHORIZED, UNAUTHORIZED_BODY)
    }

    /// Generic error page; details only go to the log.
    #[must_use]
    pub fn service_error(status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("Error");
        Self::text(status, format!("{} {reason}", status.as_u16()))
    }
}

impl From<OutboundMessage> for ProxyResponse {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Redirect(url) => Self::redirect(url),
            OutboundMessage::PostForm(html) => Self::html(html),
        }
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();
        if let Some(content_type) = self.content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if let Some(location) = self.location {
            match HeaderValue::try_from(location) {
                Ok(value) => {
                    headers.insert(header::LOCATION, value);
                }
                Err(err) => {
                    tracing::error!(error = %err, "redirect target is not a valid header value");
                    return Self::service_error(StatusCode::INTERNAL_SERVER_ERROR).into_response();
                }
            }
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}
