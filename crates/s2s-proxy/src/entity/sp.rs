//! Service provider role: the leg towards upstream identity providers.

use std::sync::Arc;

use chrono::Utc;
use s2s_protocol_saml::bindings::{decode_params, OutboundMessage, SamlMessageType};
use s2s_protocol_saml::validation::validate_response;
use s2s_protocol_saml::xml::write_authn_request;
use s2s_protocol_saml::{
    AuthnRequest, Endpoint, EndpointKind, EntityConfig, EntityRole, SamlBinding, SamlError,
};
use s2s_crypto::generate_state_key;
use tracing::{debug, info};
use url::Url;

use super::HandshakeContinuation;
use crate::config::ConfigError;
use crate::error::{ProxyError, ProxyResult};
use crate::http::{ProxyRequest, ProxyResponse};
use crate::router::{literal_pattern, HandlerSpec, Operation};
use crate::store::{HandshakeStage, RelayRecord, RelayStateStore};

/// Query parameter carrying the correlation token through discovery.
const STATE_PARAM: &str = "state";
/// Query parameter the discovery service returns the choice in.
const ENTITY_ID_PARAM: &str = "entityID";

/// A trusted upstream identity provider and the endpoints used to reach it.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Entity ID of the upstream identity provider.
    pub entity_id: String,
    /// Where the authentication request is sent.
    pub sso: Endpoint,
    /// Where the upstream is asked to answer.
    pub acs: Endpoint,
}

/// Service provider instance for one request.
pub struct SamlSp {
    config: Arc<EntityConfig>,
    store: Arc<dyn RelayStateStore>,
    discovery_service: Option<String>,
    request: ProxyRequest,
    continuation: Arc<dyn HandshakeContinuation>,
}

impl std::fmt::Debug for SamlSp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlSp")
            .field("entity_id", &self.config.entity_id)
            .field("path", &self.request.path)
            .finish_non_exhaustive()
    }
}

impl SamlSp {
    pub(super) fn new(
        config: Arc<EntityConfig>,
        store: Arc<dyn RelayStateStore>,
        discovery_service: Option<String>,
        request: ProxyRequest,
        continuation: Arc<dyn HandshakeContinuation>,
    ) -> Self {
        Self {
            config,
            store,
            discovery_service,
            request,
            continuation,
        }
    }

    /// Routes served by this role: assertion consumer and discovery
    /// response endpoints, as `(pattern, arity, spec)`.
    ///
    /// # Errors
    ///
    /// Returns a `Saml` error for an unparsable endpoint URL.
    pub fn register_endpoints(config: &EntityConfig) -> ProxyResult<Vec<(String, usize, HandlerSpec)>> {
        let mut routes = Vec::new();
        for (kind, endpoint) in &config.endpoints {
            let (operation, binding) = match kind {
                EndpointKind::AssertionConsumer => (Operation::AssertionConsumer, Some(endpoint.binding)),
                EndpointKind::DiscoveryResponse => (Operation::DiscoveryResponse, None),
                EndpointKind::SingleSignOn => continue,
            };
            let spec = HandlerSpec {
                role: EntityRole::Sp,
                operation,
                binding,
            };
            routes.push((literal_pattern(&endpoint.path()?), 0, spec));
        }
        Ok(routes)
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

    /// Stores `record` under a fresh correlation token and returns it.
    ///
    /// # Errors
    ///
    /// Returns a `Store` error if the backend fails.
    pub async fn store_state(&self, record: RelayRecord) -> ProxyResult<String> {
        let key = generate_state_key();
        let stage = record.stage;
        self.store.put(&key, record).await?;
        debug!(state_key = %key, ?stage, "relay state stored");
        Ok(key)
    }

    /// Takes the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCorrelationToken` if there is none.
    pub async fn take_state(&self, key: &str) -> ProxyResult<RelayRecord> {
        let record = self.store.take(key).await?;
        debug!(state_key = %key, stage = ?record.stage, "relay state taken");
        Ok(record)
    }

    /// Resolves a trusted upstream identity provider and the endpoints a
    /// request to it would use.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIdentityProvider` for an untrusted entity and
    /// `Configuration` when an endpoint is missing.
    pub fn upstream(&self, entity_id: &str) -> ProxyResult<Upstream> {
        let idp = self
            .config
            .metadata
            .identity_provider(entity_id)
            .ok_or_else(|| SamlError::UnknownIdentityProvider(entity_id.to_string()))?;
        let sso = idp
            .sso_endpoint(SamlBinding::HttpRedirect)
            .ok_or_else(|| SamlError::Configuration(format!("no SSO endpoint for {entity_id}")))?;
        let acs = self
            .config
            .endpoint(EndpointKind::AssertionConsumer, Some(SamlBinding::HttpPost))
            .ok_or_else(|| SamlError::Configuration("no assertion consumer service".to_string()))?;
        Ok(Upstream {
            entity_id: entity_id.to_string(),
            sso: sso.clone(),
            acs: acs.clone(),
        })
    }

    /// Sends an authentication request to the upstream `entity_id`.
    ///
    /// # Errors
    ///
    /// As [`SamlSp::upstream`] and [`SamlSp::send_authn_request`].
    pub async fn authn_request(&self, entity_id: &str, state_key: &str) -> ProxyResult<ProxyResponse> {
        let upstream = self.upstream(entity_id)?;
        self.send_authn_request(&upstream, state_key)
    }

    /// Sends an authentication request to a resolved upstream.
    ///
    /// The request ID and the RelayState are both `state_key`, so either
    /// can correlate the answer.
    ///
    /// # Errors
    ///
    /// Returns a `Saml` error if the message cannot be encoded.
    pub fn send_authn_request(&self, upstream: &Upstream, state_key: &str) -> ProxyResult<ProxyResponse> {
        let Upstream { entity_id, sso, acs } = upstream;
        let request = AuthnRequest::with_id(state_key, &self.config.entity_id)
            .with_destination(&sso.url)
            .with_acs_url(&acs.url)
            .with_binding(acs.binding);
        let xml = write_authn_request(&request);
        let outbound = OutboundMessage::encode(
            sso.binding,
            SamlMessageType::Request,
            &xml,
            &sso.url,
            Some(state_key),
        )?;

        info!(
            idp = %entity_id,
            request_id = %state_key,
            binding = %sso.binding,
            "sending authentication request upstream"
        );
        Ok(outbound.into())
    }

    /// Redirects the user to the discovery service to pick an identity
    /// provider. The token comes back in the return URL.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when discovery is not configured.
    pub async fn disco_query(&self, state_key: &str) -> ProxyResult<ProxyResponse> {
        let service = self.discovery_service.as_deref().ok_or_else(|| {
            ProxyError::Configuration(ConfigError::Invalid("no discovery service configured".to_string()))
        })?;
        let endpoint = self
            .config
            .endpoint(EndpointKind::DiscoveryResponse, None)
            .ok_or_else(|| SamlError::Configuration("no discovery response endpoint".to_string()))?;

        let mut return_url = parse_url(&endpoint.url)?;
        return_url.query_pairs_mut().append_pair(STATE_PARAM, state_key);

        let mut target = parse_url(service)?;
        target
            .query_pairs_mut()
            .append_pair("entityID", &self.config.entity_id)
            .append_pair("return", return_url.as_str())
            .append_pair("returnIDParam", ENTITY_ID_PARAM);

        debug!(state_key = %state_key, "redirecting to discovery service");
        Ok(ProxyResponse::redirect(target.to_string()))
    }

    /// Handles the discovery service's answer: re-keys the pending record
    /// for the upstream leg and sends the request to the chosen provider.
    /// The record is only consumed once the choice is known to be usable.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for missing parameters,
    /// `UnknownCorrelationToken` for a stale or misplaced token and
    /// `UnknownIdentityProvider` for an untrusted choice.
    pub async fn disco_response(&self) -> ProxyResult<ProxyResponse> {
        let state_key = self
            .request
            .query_param(STATE_PARAM)
            .ok_or_else(|| ProxyError::BadRequest(format!("missing '{STATE_PARAM}' parameter")))?;
        let entity_id = self
            .request
            .query_param(ENTITY_ID_PARAM)
            .ok_or_else(|| ProxyError::BadRequest(format!("missing '{ENTITY_ID_PARAM}' parameter")))?;

        let upstream = self.upstream(entity_id)?;

        let record = self.take_state(state_key).await?;
        if record.stage != HandshakeStage::AwaitingIdpSelection {
            return Err(ProxyError::UnknownCorrelationToken(state_key.to_string()));
        }

        info!(idp = %entity_id, "identity provider selected");
        let key = self
            .store_state(record.at_stage(HandshakeStage::AwaitingUpstreamResponse))
            .await?;
        self.send_authn_request(&upstream, &key)
    }

    /// Validates an upstream response received with `binding` and hands it
    /// to the continuation.
    ///
    /// # Errors
    ///
    /// Returns a `Saml` error when decoding or validation fails, or the
    /// continuation's error.
    pub async fn authn_response(&self, binding: SamlBinding) -> ProxyResult<ProxyResponse> {
        let decoded = decode_params(binding, self.request.params(binding))?
            .require(SamlMessageType::Response)?;
        let response = validate_response(&decoded.xml, &self.config, Utc::now())?;

        if decoded.relay_state.as_deref() != response.in_response_to.as_deref() {
            debug!(
                relay_state = ?decoded.relay_state,
                in_response_to = ?response.in_response_to,
                "RelayState differs from InResponseTo"
            );
        }
        info!(
            response_id = %response.id,
            issuer = ?response.asserting_issuer(),
            "upstream response validated"
        );
        self.continuation.outgoing(response, self).await
    }
}

fn parse_url(url: &str) -> Result<Url, SamlError> {
    Url::parse(url).map_err(|e| SamlError::Configuration(format!("invalid URL {url}: {e}")))
}
