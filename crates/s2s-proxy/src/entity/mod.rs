//! Entity instance factory.
//!
//! Every request gets a fresh role instance: a [`SamlSp`] facing upstream
//! identity providers or a [`SamlIdp`] facing downstream service providers.
//! Instances borrow the process-wide configuration and store through `Arc`
//! and carry the [`HandshakeContinuation`] that receives their output.

mod idp;
mod sp;

pub use idp::SamlIdp;
pub use sp::{SamlSp, Upstream};

use std::sync::Arc;

use async_trait::async_trait;
use s2s_protocol_saml::{AuthnRequest, EntityConfig, EntityRole, Response, AUTHN_CONTEXT_UNSPECIFIED};

use crate::error::ProxyResult;
use crate::http::{ProxyRequest, ProxyResponse};
use crate::store::{RelayStateStore, RequestArgs};

/// Receives the results of role operations and drives the next leg.
#[async_trait]
pub trait HandshakeContinuation: Send + Sync {
    /// Called by the IdP role once a downstream request is accepted.
    async fn incoming(
        &self,
        info: RequestArgs,
        authn_request: AuthnRequest,
        relay_state: Option<String>,
        idp: &SamlIdp,
    ) -> ProxyResult<ProxyResponse>;

    /// Called by the SP role once an upstream response is validated.
    async fn outgoing(&self, response: Response, sp: &SamlSp) -> ProxyResult<ProxyResponse>;
}

/// Authentication context passed from the upstream to the downstream leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnInfo {
    /// Authentication context class.
    pub class_ref: String,
    /// Authority that authenticated the subject.
    pub authenticating_authority: Option<String>,
}

impl AuthnInfo {
    /// Derives the context from an upstream response.
    ///
    /// The class comes from the first authentication statement. The
    /// authority is the first authenticating authority listed there, else
    /// the responding issuer. Further authorities are dropped.
    #[must_use]
    pub fn from_response(response: &Response) -> Self {
        let contexts = response.authn_info();
        let first = contexts.first();
        let class_ref = first
            .and_then(|c| c.class_ref.clone())
            .unwrap_or_else(|| AUTHN_CONTEXT_UNSPECIFIED.to_string());
        let authenticating_authority = first
            .and_then(|c| c.authenticating_authorities.first().cloned())
            .or_else(|| response.asserting_issuer().map(str::to_string));

        Self {
            class_ref,
            authenticating_authority,
        }
    }
}

/// A role instance built for one request.
#[derive(Debug)]
pub enum RoleInstance {
    /// Service provider role.
    Sp(SamlSp),
    /// Identity provider role.
    Idp(SamlIdp),
}

/// Builds request-scoped role instances from shared configuration.
pub struct EntityFactory {
    sp: Arc<EntityConfig>,
    idp: Arc<EntityConfig>,
    store: Arc<dyn RelayStateStore>,
    discovery_service: Option<String>,
}

impl std::fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityFactory")
            .field("sp", &self.sp.entity_id)
            .field("idp", &self.idp.entity_id)
            .field("discovery_service", &self.discovery_service)
            .finish_non_exhaustive()
    }
}

impl EntityFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(
        sp: Arc<EntityConfig>,
        idp: Arc<EntityConfig>,
        store: Arc<dyn RelayStateStore>,
        discovery_service: Option<String>,
    ) -> Self {
        Self {
            sp,
            idp,
            store,
            discovery_service,
        }
    }

    /// Builds the instance for `role`.
    #[must_use]
    pub fn create(
        &self,
        role: EntityRole,
        request: ProxyRequest,
        continuation: Arc<dyn HandshakeContinuation>,
    ) -> RoleInstance {
        match role {
            EntityRole::Sp => RoleInstance::Sp(self.create_sp(request, continuation)),
            EntityRole::Idp => RoleInstance::Idp(self.create_idp(request, continuation)),
        }
    }

    /// Builds a service provider instance.
    #[must_use]
    pub fn create_sp(&self, request: ProxyRequest, continuation: Arc<dyn HandshakeContinuation>) -> SamlSp {
        SamlSp::new(
            Arc::clone(&self.sp),
            Arc::clone(&self.store),
            self.discovery_service.clone(),
            request,
            continuation,
        )
    }

    /// Builds an identity provider instance.
    #[must_use]
    pub fn create_idp(&self, request: ProxyRequest, continuation: Arc<dyn HandshakeContinuation>) -> SamlIdp {
        SamlIdp::new(Arc::clone(&self.idp), request, continuation)
    }

    /// Configuration of the SP role.
    #[must_use]
    pub fn sp_config(&self) -> &Arc<EntityConfig> {
        &self.sp
    }

    /// Configuration of the IdP role.
    #[must_use]
    pub fn idp_config(&self) -> &Arc<EntityConfig> {
        &self.idp
    }
}


#[cfg(test)]
mod tests {
    use s2s_protocol_saml::{Assertion, AuthnContext, AuthnStatement};

    use super::testing::*;
    use super::*;

    #[test]
    fn factory_builds_requested_role() {
        let (factory, _) = factory(false);
        let continuation: Arc<dyn HandshakeContinuation> = Arc::new(Recorder::default());

        let sp = factory.create(EntityRole::Sp, ProxyRequest::default(), Arc::clone(&continuation));
        assert!(matches!(sp, RoleInstance::Sp(_)));
        let idp = factory.create(EntityRole::Idp, ProxyRequest::default(), continuation);
        assert!(matches!(idp, RoleInstance::Idp(_)));
    }

    #[test]
    fn first_authority_is_used() {
        let assertion = Assertion::new(UPSTREAM_ID).with_authn_statement(AuthnStatement::new(
            AuthnContext::new("urn:example:ac:mfa")
                .with_authority("https://first.example.org")
                .with_authority("https://second.example.org"),
        ));
        let response = Response::success(UPSTREAM_ID).with_assertion(assertion);

        let info = AuthnInfo::from_response(&response);
        assert_eq!(info.class_ref, "urn:example:ac:mfa");
        assert_eq!(
            info.authenticating_authority.as_deref(),
            Some("https://first.example.org")
        );
    }

    #[test]
    fn authority_falls_back_to_issuer() {
        let response = Response::success(UPSTREAM_ID).with_assertion(Assertion::new(UPSTREAM_ID));
        let info = AuthnInfo::from_response(&response);
        assert_eq!(info.class_ref, AUTHN_CONTEXT_UNSPECIFIED);
        assert_eq!(info.authenticating_authority.as_deref(), Some(UPSTREAM_ID));
    }

    #[test]
    fn authority_falls_back_to_assertion_issuer() {
        let mut response = Response::success(UPSTREAM_ID).with_assertion(Assertion::new("https://a.example.org"));
        response.issuer = None;
        let info = AuthnInfo::from_response(&response);
        assert_eq!(info.authenticating_authority.as_deref(), Some("https://a.example.org"));
    }
}
