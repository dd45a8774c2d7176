//! Identity provider role: the leg towards downstream service providers.

use std::sync::Arc;

use s2s_protocol_saml::bindings::{decode_params, OutboundMessage, SamlMessageType};
use s2s_protocol_saml::validation::accept_authn_request;
use s2s_protocol_saml::xml::{parse_authn_request, write_response};
use s2s_protocol_saml::{
    Assertion, AttributeStatement, AuthnContext, AuthnRequest, AuthnStatement, Conditions,
    EndpointKind, EntityConfig, EntityRole, NameId, Response, SamlBinding, SamlError, Subject,
    SubjectConfirmation,
};
use tracing::info;

use super::{AuthnInfo, HandshakeContinuation};
use crate::attributes::AttributeSet;
use crate::error::ProxyResult;
use crate::http::{ProxyRequest, ProxyResponse};
use crate::router::{literal_pattern, HandlerSpec, Operation};
use crate::store::RequestArgs;

/// Validity of forged assertions and their subject confirmation, in minutes.
const ASSERTION_VALIDITY_MINUTES: i64 = 5;

/// Identity provider instance for one request.
pub struct SamlIdp {
    config: Arc<EntityConfig>,
    request: ProxyRequest,
    continuation: Arc<dyn HandshakeContinuation>,
}

impl std::fmt::Debug for SamlIdp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlIdp")
            .field("entity_id", &self.config.entity_id)
            .field("path", &self.request.path)
            .finish_non_exhaustive()
    }
}

impl SamlIdp {
    pub(super) fn new(
        config: Arc<EntityConfig>,
        request: ProxyRequest,
        continuation: Arc<dyn HandshakeContinuation>,
    ) -> Self {
        Self {
            config,
            request,
            continuation,
        }
    }

    /// Routes served by this role: one per single sign-on endpoint.
    ///
    /// # Errors
    ///
    /// Returns a `Saml` error for an unparsable endpoint URL.
    pub fn register_endpoints(config: &EntityConfig) -> ProxyResult<Vec<(String, usize, HandlerSpec)>> {
        config
            .endpoints(EndpointKind::SingleSignOn)
            .map(|endpoint| {
                let spec = HandlerSpec {
                    role: EntityRole::Idp,
                    operation: Operation::SingleSignOn,
                    binding: Some(endpoint.binding),
                };
                Ok((literal_pattern(&endpoint.path()?), 0, spec))
            })
            .collect()
    }

    /// The request this instance serves.
    #[must_use]
    pub fn request(&self) -> &ProxyRequest {
        &self.request
    }

    /// The continuation this instance reports to.
    #[must_use]
    pub fn continuation(&self) -> Arc<dyn HandshakeContinuation> {
        Arc::clone(&self.continuation)
    }

    /// Accepts a downstream authentication request received with
    /// `binding` and hands it to the continuation.
    ///
    /// # Errors
    ///
    /// Returns a `Saml` error when decoding, parsing or acceptance fails,
    /// or the continuation's error.
    pub async fn handle_authn_request(&self, binding: SamlBinding) -> ProxyResult<ProxyResponse> {
        let decoded = decode_params(binding, self.request.params(binding))?
            .require(SamlMessageType::Request)?;
        let request = parse_authn_request(&decoded.xml)?;
        request.validate()?;
        let args = self.response_args(&request)?;

        info!(
            sp = %args.sp_entity_id,
            request_id = %request.id,
            %binding,
            "authentication request accepted"
        );
        self.continuation
            .incoming(args, request, decoded.relay_state, self)
            .await
    }

    /// Resolves where and how the answer to `request` goes.
    ///
    /// # Errors
    ///
    /// See [`accept_authn_request`].
    pub fn response_args(&self, request: &AuthnRequest) -> ProxyResult<RequestArgs> {
        let target = accept_authn_request(request, &self.config)?;
        Ok(RequestArgs {
            sp_entity_id: target.sp_entity_id,
            destination: target.destination,
            response_binding: target.binding,
            in_response_to: request.id.clone(),
        })
    }

    /// Forges the signed response to the original requester.
    ///
    /// The assertion is signed first, then the enclosing response.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without signing credentials, or a signing
    /// or encoding error.
    pub fn construct_authn_response(
        &self,
        attributes: &AttributeSet,
        name_id: NameId,
        authn: &AuthnInfo,
        args: &RequestArgs,
        relay_state: Option<&str>,
    ) -> ProxyResult<ProxyResponse> {
        let signer = self
            .config
            .signer
            .as_ref()
            .ok_or_else(|| SamlError::Configuration("no signing credentials".to_string()))?;
        let issuer = &self.config.entity_id;

        let mut context = AuthnContext::new(&authn.class_ref);
        if let Some(authority) = &authn.authenticating_authority {
            context = context.with_authority(authority);
        }
        let mut assertion = Assertion::new(issuer)
            .with_subject(Subject::new(name_id).with_confirmation(SubjectConfirmation::bearer(
                &args.destination,
                Some(args.in_response_to.clone()),
                ASSERTION_VALIDITY_MINUTES,
            )))
            .with_conditions(
                Conditions::with_validity(ASSERTION_VALIDITY_MINUTES).with_audience(&args.sp_entity_id),
            )
            .with_authn_statement(AuthnStatement::new(context));
        if !attributes.is_empty() {
            assertion = assertion.with_attribute_statement(AttributeStatement::from_map(attributes));
        }
        let assertion_id = assertion.id.clone();

        let response = Response::success(issuer)
            .in_response_to(&args.in_response_to)
            .with_destination(&args.destination)
            .with_assertion(assertion);
        let xml = write_response(&response);
        let xml = signer.sign(&xml, &assertion_id)?;
        let xml = signer.sign(&xml, &response.id)?;

        let outbound = OutboundMessage::encode(
            args.response_binding,
            SamlMessageType::Response,
            &xml,
            &args.destination,
            relay_state,
        )?;

        info!(
            sp = %args.sp_entity_id,
            response_id = %response.id,
            in_response_to = %args.in_response_to,
            attributes = attributes.len(),
            "signed response issued"
        );
        Ok(outbound.into())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode, Uri};
    use s2s_protocol_saml::bindings::{extract_form_action, extract_form_value, HttpRedirectBinding};
    use s2s_protocol_saml::signature::XmlSignatureValidator;
    use s2s_protocol_saml::xml::{parse_response, write_authn_request};

    use super::super::testing::*;
    use super::*;
    use crate::error::ProxyError;

    fn idp(request: ProxyRequest) -> (SamlIdp, Arc<Recorder>) {
        let (factory, _) = factory(false);
        let recorder = Arc::new(Recorder::default());
        (factory.create_idp(request, recorder.clone()), recorder)
    }

    fn redirect_request(request: &AuthnRequest, relay_state: Option<&str>) -> ProxyRequest {
        let url = HttpRedirectBinding::encode(
            &write_authn_request(request),
            "https://proxy.example.com/sso/redirect",
            relay_state,
            SamlMessageType::Request,
        )
        .unwrap();
        let uri: Uri = url.trim_start_matches("https://proxy.example.com").parse().unwrap();
        ProxyRequest::from_parts(Method::GET, &uri, b"")
    }

    fn args() -> RequestArgs {
        RequestArgs {
            sp_entity_id: SP_ID.to_string(),
            destination: SP_ACS.to_string(),
            response_binding: SamlBinding::HttpPost,
            in_response_to: "_sp_req".to_string(),
        }
    }

    #[test]
    fn registers_one_route_per_sso_endpoint() {
        let doc = document(false);
        let routes = SamlIdp::register_endpoints(&doc.entity_config(EntityRole::Idp).unwrap()).unwrap();
        let patterns: Vec<_> = routes.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(patterns, vec!["sso/redirect", "sso/post"]);
        assert_eq!(routes[1].2.binding, Some(SamlBinding::HttpPost));
    }

    #[tokio::test]
    async fn accepted_request_reaches_continuation() {
        let request = AuthnRequest::new(SP_ID).with_destination("https://proxy.example.com/sso/redirect");
        let (idp, recorder) = idp(redirect_request(&request, Some("sp-state")));

        let response = idp.handle_authn_request(SamlBinding::HttpRedirect).await.unwrap();
        assert_eq!(response.body, "incoming");

        let seen = recorder.incoming.lock().unwrap();
        let (info, relay_state) = &seen[0];
        assert_eq!(info.sp_entity_id, SP_ID);
        assert_eq!(info.destination, SP_ACS);
        assert_eq!(info.in_response_to, request.id);
        assert_eq!(relay_state.as_deref(), Some("sp-state"));
    }

    #[tokio::test]
    async fn unknown_requester_is_refused() {
        let request = AuthnRequest::new("https://stranger.example.com");
        let (idp, recorder) = idp(redirect_request(&request, None));

        let err = idp.handle_authn_request(SamlBinding::HttpRedirect).await.unwrap_err();
        assert!(matches!(err, ProxyError::Saml(SamlError::UnknownServiceProvider(_))));
        assert_eq!(err.http_status(), StatusCode::FORBIDDEN);
        assert!(recorder.incoming.lock().unwrap().is_empty());
    }

    #[test]
    fn unregistered_acs_url_is_refused() {
        let (idp, _) = idp(ProxyRequest::default());
        let request = AuthnRequest::new(SP_ID).with_acs_url("https://evil.example.com/acs");
        assert!(matches!(
            idp.response_args(&request),
            Err(ProxyError::Saml(SamlError::InvalidRequest(_)))
        ));
    }

    #[test]
    fn constructed_response_is_signed_and_addressed() {
        let (idp, _) = idp(ProxyRequest::default());
        let attributes: AttributeSet = [("mail".to_string(), vec!["alice@example.com".to_string()])].into();
        let authn = AuthnInfo {
            class_ref: "urn:example:ac:password".to_string(),
            authenticating_authority: Some(UPSTREAM_ID.to_string()),
        };

        let page = idp
            .construct_authn_response(&attributes, NameId::new("alice"), &authn, &args(), Some("sp-state"))
            .unwrap();
        assert_eq!(page.status, StatusCode::OK);
        assert_eq!(extract_form_action(&page.body).as_deref(), Some(SP_ACS));
        assert_eq!(extract_form_value(&page.body, "RelayState").as_deref(), Some("sp-state"));

        let encoded = extract_form_value(&page.body, "SAMLResponse").unwrap();
        let xml = String::from_utf8(
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).unwrap(),
        )
        .unwrap();
        let response = parse_response(&xml).unwrap();
        assert_eq!(response.in_response_to.as_deref(), Some("_sp_req"));
        assert_eq!(response.destination.as_deref(), Some(SP_ACS));
        assert_eq!(response.attributes(), attributes);
        assert_eq!(
            response.authn_info()[0].authenticating_authorities,
            vec![UPSTREAM_ID.to_string()]
        );

        let proxy_cert = std::fs::read_to_string(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("../../tests/integration/fixtures/pki/proxy.cert.pem"),
        )
        .unwrap();
        let signature = XmlSignatureValidator::from_pem(&[&proxy_cert])
            .unwrap()
            .validate(&xml)
            .unwrap();
        assert_eq!(signature.reference_id(), response.id);
    }
}
