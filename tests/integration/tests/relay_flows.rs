//! Full handshakes from a downstream SP through the proxy to the
//! upstream IdP and back.

use axum::http::StatusCode;
use s2s_protocol_saml::xml::parse_response;
use s2s_protocol_saml::NameId;
use url::Url;

use crate::common::*;

#[tokio::test]
async fn test_fixed_upstream_handshake() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let (sp_request, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    assert_eq!(redirect.status, StatusCode::SEE_OTHER, "body: {}", redirect.body);
    let location = redirect.location.expect("Location header");
    assert!(location.starts_with(UPSTREAM_SSO), "unexpected target {location}");

    let (upstream, relay_state) = upstream_request(&location)?;
    assert_eq!(upstream.issuer, PROXY_ID);
    assert_eq!(
        relay_state.as_deref(),
        Some(upstream.id.as_str()),
        "correlation token travels as both request ID and RelayState"
    );

    let xml = upstream_response(&upstream.id, "alice@example.com")?;
    let page = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(page.status, StatusCode::OK, "body: {}", page.body);
    assert_eq!(page.form_value("RelayState").as_deref(), Some("sp-state"));
    assert!(page.body.contains(SP_ACS), "form must post to the SP's ACS");

    let forged = page.saml_response_xml()?;
    let signature = proxy_validator()?.validate(&forged)?;

    let response = parse_response(&forged)?;
    assert_eq!(signature.reference_id(), response.id);
    assert_eq!(response.issuer.as_deref(), Some(PROXY_ID));
    assert_eq!(response.in_response_to.as_deref(), Some(sp_request.id.as_str()));
    assert_eq!(response.destination.as_deref(), Some(SP_ACS));
    assert_eq!(response.subject(), Some(&NameId::new("alice-upstream")));

    let contexts = response.authn_info();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].class_ref.as_deref(), Some(PASSWORD_CLASS));
    assert_eq!(contexts[0].authenticating_authorities, vec!["https://home.example.org".to_string()]);

    let attributes = response.attributes();
    assert_eq!(attributes.get("mail"), Some(&vec!["alice@example.com".to_string()]));
    assert_eq!(attributes.get("displayName"), Some(&vec!["Alice Liddell".to_string()]));
    assert_eq!(
        attributes.get("eduPersonAffiliation"),
        Some(&vec!["member".to_string(), "staff".to_string()])
    );
    assert_eq!(attributes.get("o"), Some(&vec!["Example Org".to_string()]));
    assert!(
        !attributes.contains_key("eduPersonEntitlement"),
        "upstream attributes are not relayed"
    );

    Ok(())
}

#[tokio::test]
async fn test_replayed_response_is_refused() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let (_, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    let (upstream, _) = upstream_request(&redirect.location.expect("Location header"))?;
    let xml = upstream_response(&upstream.id, "alice@example.com")?;

    let first = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(first.status, StatusCode::OK);

    let replay = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(replay.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(replay.form_value("SAMLResponse").is_none());

    Ok(())
}

#[tokio::test]
async fn test_discovery_handshake() -> anyhow::Result<()> {
    let env = TestEnv::with_discovery().await?;

    let (sp_request, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    assert_eq!(redirect.status, StatusCode::SEE_OTHER);
    let disco = Url::parse(&redirect.location.expect("Location header"))?;
    assert_eq!(disco.host_str(), Some("disco.example.com"));

    let params: Vec<(String, String)> = disco.query_pairs().into_owned().collect();
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(param("entityID").as_deref(), Some(PROXY_ID));
    assert_eq!(param("returnIDParam").as_deref(), Some("entityID"));

    // The discovery service sends the user back with its choice.
    let mut back = Url::parse(&param("return").expect("return parameter"))?;
    assert_eq!(back.path(), "/disco");
    back.query_pairs_mut().append_pair("entityID", UPSTREAM_ID);
    let uri = format!("{}?{}", back.path(), back.query().unwrap_or_default());

    let to_upstream = env.get(&uri).await?;
    assert_eq!(to_upstream.status, StatusCode::SEE_OTHER, "body: {}", to_upstream.body);
    let location = to_upstream.location.expect("Location header");
    assert!(location.starts_with(UPSTREAM_SSO));
    let (upstream, relay_state) = upstream_request(&location)?;
    assert_eq!(relay_state.as_deref(), Some(upstream.id.as_str()));

    // The discovery token is spent.
    let again = env.get(&uri).await?;
    assert_eq!(again.status, StatusCode::INTERNAL_SERVER_ERROR);

    let xml = upstream_response(&upstream.id, "bob@example.com")?;
    let page = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(page.status, StatusCode::OK, "body: {}", page.body);
    assert_eq!(page.form_value("RelayState").as_deref(), Some("sp-state"));

    let response = parse_response(&page.saml_response_xml()?)?;
    assert_eq!(response.in_response_to.as_deref(), Some(sp_request.id.as_str()));
    let attributes = response.attributes();
    assert_eq!(attributes.get("displayName"), Some(&vec!["Bob".to_string()]));
    assert!(!attributes.contains_key("eduPersonAffiliation"));

    Ok(())
}

#[tokio::test]
async fn test_discovery_choice_must_be_trusted() -> anyhow::Result<()> {
    let env = TestEnv::with_discovery().await?;

    let (_, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    let disco = Url::parse(&redirect.location.expect("Location header"))?;
    let back = disco
        .query_pairs()
        .find(|(k, _)| k == "return")
        .map(|(_, v)| v.into_owned())
        .expect("return parameter");
    let mut back = Url::parse(&back)?;
    back.query_pairs_mut()
        .append_pair("entityID", "https://stranger.example.com/idp.xml");
    let uri = format!("{}?{}", back.path(), back.query().unwrap_or_default());

    let response = env.get(&uri).await?;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn test_discovery_return_without_parameters() -> anyhow::Result<()> {
    let env = TestEnv::with_discovery().await?;

    let response = env.get("/disco").await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_unknown_subject_gets_no_assertion() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let (_, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    let (upstream, _) = upstream_request(&redirect.location.expect("Location header"))?;
    let xml = upstream_response(&upstream.id, "mallory@example.com")?;

    let page = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(page.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(page.form_value("SAMLResponse").is_none());

    Ok(())
}

#[tokio::test]
async fn test_tampered_response_is_rejected() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let (_, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    let (upstream, _) = upstream_request(&redirect.location.expect("Location header"))?;
    let xml = upstream_response(&upstream.id, "bob@example.com")?.replace("bob@example.com", "alice@example.com");

    let page = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(page.status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_assertion_signed_alone_is_accepted() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let (_, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    let (upstream, _) = upstream_request(&redirect.location.expect("Location header"))?;
    let xml = upstream_response_signed_assertion(&upstream.id, "alice@example.com")?;

    let page = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(page.status, StatusCode::OK, "body: {}", page.body);

    Ok(())
}

#[tokio::test]
async fn test_wrapped_signed_assertion_is_rejected() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let (_, redirect) = env.start_sso(SP_ID, "sp-state").await?;
    let (upstream, _) = upstream_request(&redirect.location.expect("Location header"))?;
    let xml = wrapped_response(&upstream.id, "alice@example.com")?;

    let page = env.post_upstream_response(&xml, &upstream.id).await?;
    assert_eq!(page.status, StatusCode::UNAUTHORIZED, "body: {}", page.body);
    assert!(page.form_value("SAMLResponse").is_none());

    Ok(())
}

#[tokio::test]
async fn test_unsolicited_response_is_refused() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let xml = upstream_response("_never-issued", "alice@example.com")?;
    let page = env.post_upstream_response(&xml, "_never-issued").await?;
    assert_eq!(page.status, StatusCode::INTERNAL_SERVER_ERROR);

    Ok(())
}

#[tokio::test]
async fn test_untrusted_service_provider_is_refused() -> anyhow::Result<()> {
    let env = TestEnv::with_fixed_upstream().await?;

    let (_, response) = env.start_sso("https://stranger.example.com/sp.xml", "sp-state").await?;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert!(response.location.is_none());

    Ok(())
}

#[tokio::test]
async fn test_debug_mode_exposes_error_chain() -> anyhow::Result<()> {
    let env = TestEnv::debug().await?;

    let xml = upstream_response("_never-issued", "alice@example.com")?;
    let page = env.post_upstream_response(&xml, "_never-issued").await?;
    assert_eq!(page.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(page.body.contains("UnknownCorrelationToken"), "body: {}", page.body);

    Ok(())
}
