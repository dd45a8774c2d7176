//! Common test utilities and fixtures.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::Engine;
use http_body_util::BodyExt;
use s2s_protocol_saml::bindings::{extract_form_value, HttpRedirectBinding, SamlMessageType};
use s2s_protocol_saml::signature::{XmlSignatureValidator, XmlSigner};
use s2s_protocol_saml::xml::{parse_authn_request, parse_response, write_authn_request, write_response};
use s2s_protocol_saml::{
    Assertion, AttributeMap, AttributeStatement, AuthnContext, AuthnRequest, AuthnStatement,
    Conditions, NameId, Response, Subject, SubjectConfirmation,
};
use s2s_proxy::attributes::AttributeModuleRegistry;
use s2s_proxy::config::{ProxyConfig, ServerConfig};
use s2s_proxy::{server, store, Proxy, ProxyContext};
use tower::ServiceExt;

pub const PROXY_ID: &str = "https://proxy.example.com/proxy.xml";
pub const SP_ID: &str = "https://sp.example.com/sp.xml";
pub const SP_ACS: &str = "https://sp.example.com/acs/post";
pub const UPSTREAM_ID: &str = "https://idp.example.com/idp.xml";
pub const UPSTREAM_SSO: &str = "https://idp.example.com/sso";
pub const PROXY_ACS: &str = "https://proxy.example.com/acs/post";
pub const PASSWORD_CLASS: &str = "urn:oasis:names:tc:SAML:2.0:ac:classes:Password";

pub fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixtures().join(name)).unwrap()
}

/// A response as seen by the browser.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: String,
}

impl TestResponse {
    /// Value of a hidden field in an auto-submitting form.
    pub fn form_value(&self, name: &str) -> Option<String> {
        extract_form_value(&self.body, name)
    }

    /// Decoded XML of a posted SAMLResponse.
    pub fn saml_response_xml(&self) -> anyhow::Result<String> {
        let encoded = self
            .form_value("SAMLResponse")
            .ok_or_else(|| anyhow::anyhow!("no SAMLResponse in page: {}", self.body))?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// The proxy router loaded from the fixture configuration, driven
/// in-process.
pub struct TestEnv {
    router: Router,
}

impl TestEnv {
    /// Proxy routing through the discovery service.
    pub async fn with_discovery() -> anyhow::Result<Self> {
        Self::build(false, None).await
    }

    /// Proxy with a fixed upstream, as with `-e`.
    pub async fn with_fixed_upstream() -> anyhow::Result<Self> {
        Self::build(false, Some(UPSTREAM_ID)).await
    }

    /// Fixed upstream, debug mode.
    pub async fn debug() -> anyhow::Result<Self> {
        Self::build(true, Some(UPSTREAM_ID)).await
    }

    async fn build(debug: bool, upstream: Option<&str>) -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("s2s_proxy=debug")
            .with_test_writer()
            .try_init();

        let proxy_config = ProxyConfig::load(&fixtures().join("proxy.toml"))?;
        let server_config = ServerConfig::load(&fixtures().join("server.toml"))?;

        let store = store::connect(&server_config.store).await?;
        let context = ProxyContext::build(
            &proxy_config,
            store,
            &AttributeModuleRegistry::with_builtin(),
            debug,
            upstream.map(str::to_string),
        )?;
        let proxy = Arc::new(Proxy::from_context(context)?);
        let router = server::build_router(proxy, server_config.static_dir.as_deref());
        Ok(Self { router })
    }

    pub async fn get(&self, uri: &str) -> anyhow::Result<TestResponse> {
        let request = Request::builder().method(Method::GET).uri(uri).body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post_form(&self, uri: &str, form: &[(&str, &str)]) -> anyhow::Result<TestResponse> {
        let body = form
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> anyhow::Result<TestResponse> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().map(str::to_string))
            .transpose()?;
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(TestResponse {
            status,
            location,
            body: String::from_utf8(bytes.to_vec())?,
        })
    }

    /// Sends an AuthnRequest from `sp_entity_id` to the redirect SSO
    /// endpoint.
    pub async fn start_sso(&self, sp_entity_id: &str, relay_state: &str) -> anyhow::Result<(AuthnRequest, TestResponse)> {
        let request = AuthnRequest::new(sp_entity_id);
        let url = HttpRedirectBinding::encode(
            &write_authn_request(&request),
            "/sso/redirect",
            Some(relay_state),
            SamlMessageType::Request,
        )?;
        let response = self.get(&url).await?;
        Ok((request, response))
    }

    /// Posts an upstream response to the proxy's assertion consumer.
    pub async fn post_upstream_response(&self, xml: &str, relay_state: &str) -> anyhow::Result<TestResponse> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(xml);
        self.post_form(
            "/acs/post",
            &[("SAMLResponse", encoded.as_str()), ("RelayState", relay_state)],
        )
        .await
    }
}

/// The AuthnRequest the proxy sent upstream and its RelayState.
pub fn upstream_request(location: &str) -> anyhow::Result<(AuthnRequest, Option<String>)> {
    let decoded = HttpRedirectBinding::decode_url(location)?;
    Ok((parse_authn_request(&decoded.xml)?, decoded.relay_state))
}

/// An unsigned response from the upstream identity provider for `mail`.
pub fn upstream_document(in_response_to: &str, mail: &str) -> Response {
    let attributes: AttributeMap = [
        ("mail".to_string(), vec![mail.to_string()]),
        ("eduPersonEntitlement".to_string(), vec!["urn:example:upstream-only".to_string()]),
    ]
    .into();
    let assertion = Assertion::new(UPSTREAM_ID)
        .with_subject(
            Subject::new(NameId::new("alice-upstream")).with_confirmation(SubjectConfirmation::bearer(
                PROXY_ACS,
                Some(in_response_to.to_string()),
                5,
            )),
        )
        .with_conditions(Conditions::with_validity(5).with_audience(PROXY_ID))
        .with_authn_statement(AuthnStatement::new(
            AuthnContext::new(PASSWORD_CLASS).with_authority("https://home.example.org"),
        ))
        .with_attribute_statement(AttributeStatement::from_map(&attributes));
    Response::success(UPSTREAM_ID)
        .in_response_to(in_response_to)
        .with_destination(PROXY_ACS)
        .with_assertion(assertion)
}

fn upstream_signer() -> anyhow::Result<XmlSigner> {
    Ok(XmlSigner::from_pem(
        &read_fixture("pki/upstream.key.pem"),
        Some(&read_fixture("pki/upstream.cert.pem")),
    )?)
}

/// A response from the upstream identity provider for `mail`, signed
/// with the upstream key.
pub fn upstream_response(in_response_to: &str, mail: &str) -> anyhow::Result<String> {
    let response = upstream_document(in_response_to, mail);
    Ok(upstream_signer()?.sign(&write_response(&response), &response.id)?)
}

/// The response with only its assertion signed.
pub fn upstream_response_signed_assertion(in_response_to: &str, mail: &str) -> anyhow::Result<String> {
    let response = upstream_document(in_response_to, mail);
    Ok(upstream_signer()?.sign(&write_response(&response), &response.assertions[0].id)?)
}

/// An unsigned response asserting `mail`, whose assertion takes over the ID
/// of a genuinely signed assertion for another user and nests it.
pub fn wrapped_response(in_response_to: &str, mail: &str) -> anyhow::Result<String> {
    let genuine = upstream_response_signed_assertion(in_response_to, "mallory@example.com")?;
    let genuine_id = parse_response(&genuine)?.assertions[0].id.clone();
    let start = genuine.find("<saml:Assertion").ok_or_else(|| anyhow::anyhow!("no assertion"))?;
    let end = genuine
        .rfind("</saml:Assertion>")
        .ok_or_else(|| anyhow::anyhow!("no assertion end"))?
        + "</saml:Assertion>".len();

    let forged = upstream_document(in_response_to, mail);
    Ok(write_response(&forged)
        .replace(&format!("ID=\"{}\"", forged.assertions[0].id), &format!("ID='{genuine_id}'"))
        .replace("</saml:Assertion>", &format!("{}</saml:Assertion>", &genuine[start..end])))
}

/// Validator trusting the proxy's signing certificate.
pub fn proxy_validator() -> anyhow::Result<XmlSignatureValidator> {
    Ok(XmlSignatureValidator::from_pem(&[&read_fixture("pki/proxy.cert.pem")])?)
}
