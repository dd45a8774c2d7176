//! Path resolution at the HTTP surface.

use axum::http::StatusCode;

use crate::common::*;

#[tokio::test]
async fn test_path_traversal_is_unauthorized() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let response = env.get("/sso/../proxy.toml").await?;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body, "Unauthorized");

    let response = env.get("/sso/%2e%2e/proxy.toml").await?;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = env.get("/%2E%2E/%FF").await?;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_unknown_path_is_not_found() -> anyhow::Result<()> {
    let env = TestEnv::debug().await?;

    let response = env.get("/nowhere").await?;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body, "Couldn't find the side you asked for!");

    Ok(())
}

#[tokio::test]
async fn test_wrong_message_on_endpoint_is_bad_request() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let response = env.get("/sso/redirect").await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = env.post_form("/sso/post", &[("SAMLResponse", "PHg+PC94Pg==")]).await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_post_binding_sso() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let request = s2s_protocol_saml::AuthnRequest::new(SP_ID);
    let xml = s2s_protocol_saml::xml::write_authn_request(&request);
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, xml);

    let response = env
        .post_form("/sso/post", &[("SAMLRequest", encoded.as_str()), ("RelayState", "sp-state")])
        .await?;
    assert_eq!(response.status, StatusCode::SEE_OTHER, "body: {}", response.body);
    assert!(response.location.is_some_and(|l| l.starts_with(UPSTREAM_SSO)));

    Ok(())
}

#[tokio::test]
async fn test_static_assets_are_served() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let response = env.get("/robots.txt").await?;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("Disallow: /"));

    let response = env.get("/static/robots.txt").await?;
    assert_eq!(response.status, StatusCode::OK);

    Ok(())
}
