//! Relay orchestrator.
//!
//! Drives the two legs of a relayed handshake:
//!
//! ```text
//! Start ──▶ AwaitingIdpSelection ──▶ AwaitingUpstreamResponse ──▶ ResponseConstructed
//!   └──────▶ RedirectedToIdp ─────────────┘   (fixed upstream)
//! ```
//!
//! The inbound leg resolves the upstream, stores a [`RelayRecord`] and
//! sends the user there.
//! The outbound leg takes the record back by the response's
//! `InResponseTo`, resolves the released attributes and forges the signed
//! answer to the original requester.

use std::sync::Arc;

use async_trait::async_trait;
use s2s_protocol_saml::{AuthnRequest, Response, SamlError};
use tracing::{error, info};

use crate::attributes::{AttributeError, AttributeModule};
use crate::entity::{AuthnInfo, EntityFactory, HandshakeContinuation, SamlIdp, SamlSp};
use crate::error::{ProxyError, ProxyResult};
use crate::http::ProxyResponse;
use crate::store::{HandshakeStage, RelayRecord, RequestArgs};

/// Continuation joining the IdP-facing and SP-facing legs.
pub struct RelayOrchestrator {
    factory: Arc<EntityFactory>,
    attribute_module: Arc<dyn AttributeModule>,
    upstream_entity_id: Option<String>,
}

impl std::fmt::Debug for RelayOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayOrchestrator")
            .field("factory", &self.factory)
            .field("upstream_entity_id", &self.upstream_entity_id)
            .finish_non_exhaustive()
    }
}

impl RelayOrchestrator {
    /// Creates an orchestrator. With `upstream_entity_id` set, discovery
    /// is skipped and every request goes to that identity provider.
    #[must_use]
    pub fn new(
        factory: Arc<EntityFactory>,
        attribute_module: Arc<dyn AttributeModule>,
        upstream_entity_id: Option<String>,
    ) -> Self {
        Self {
            factory,
            attribute_module,
            upstream_entity_id,
        }
    }
}

#[async_trait]
impl HandshakeContinuation for RelayOrchestrator {
    async fn incoming(
        &self,
        info: RequestArgs,
        authn_request: AuthnRequest,
        relay_state: Option<String>,
        idp: &SamlIdp,
    ) -> ProxyResult<ProxyResponse> {
        let sp = self.factory.create_sp(idp.request().clone(), idp.continuation());
        let record = RelayRecord {
            stage: HandshakeStage::AwaitingIdpSelection,
            authn_request,
            relay_state,
            request_args: info,
        };

        match &self.upstream_entity_id {
            Some(entity_id) => {
                let upstream = sp.upstream(entity_id)?;
                let key = sp
                    .store_state(record.at_stage(HandshakeStage::AwaitingUpstreamResponse))
                    .await?;
                sp.send_authn_request(&upstream, &key)
            }
            None => {
                let key = sp.store_state(record).await?;
                sp.disco_query(&key).await
            }
        }
    }

    async fn outgoing(&self, response: Response, sp: &SamlSp) -> ProxyResult<ProxyResponse> {
        let token = response
            .in_response_to
            .as_deref()
            .ok_or_else(|| ProxyError::UnknownCorrelationToken(String::new()))?;
        let record = sp.take_state(token).await?;
        if record.stage != HandshakeStage::AwaitingUpstreamResponse {
            return Err(ProxyError::UnknownCorrelationToken(token.to_string()));
        }

        let name_id = response
            .subject()
            .cloned()
            .ok_or_else(|| SamlError::MissingElement("NameID".to_string()))?;
        let authn = AuthnInfo::from_response(&response);

        let attributes = self
            .attribute_module
            .get_attributes(&response.attributes())
            .inspect_err(|err| {
                if matches!(err, AttributeError::NoMatchingIdentity) {
                    error!(
                        subject = %name_id.value,
                        issuer = ?response.asserting_issuer(),
                        "no matching identity for authenticated subject"
                    );
                }
            })?;

        info!(
            sp = %record.request_args.sp_entity_id,
            subject = %name_id.value,
            "relaying authentication to requester"
        );
        let idp = self.factory.create_idp(sp.request().clone(), sp.continuation());
        idp.construct_authn_response(
            &attributes,
            name_id,
            &authn,
            &record.request_args,
            record.relay_state.as_deref(),
        )
    }
}
