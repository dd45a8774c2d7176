//! The proxy application: route resolution, role dispatch and error
//! policy.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::ProxyContext;
use crate::entity::{EntityFactory, HandshakeContinuation, RoleInstance, SamlIdp, SamlSp};
use crate::error::{ProxyError, ProxyResult};
use crate::http::{ProxyRequest, ProxyResponse};
use crate::orchestrator::RelayOrchestrator;
use crate::router::{HandlerSpec, Operation, Resolution, RouteTable};

/// The assembled proxy. Immutable after construction.
#[derive(Debug)]
pub struct Proxy {
    routes: RouteTable,
    factory: Arc<EntityFactory>,
    relay: Arc<RelayOrchestrator>,
    debug: bool,
}

impl Proxy {
    /// Assembles the proxy and registers the routes of both roles, IdP
    /// endpoints first.
    ///
    /// # Errors
    ///
    /// Returns a `Router` or `Saml` error if an endpoint cannot be routed.
    pub fn from_context(context: ProxyContext) -> ProxyResult<Self> {
        let factory = Arc::new(EntityFactory::new(
            context.sp_config,
            context.idp_config,
            context.store,
            context.settings.discovery_service,
        ));
        let relay = Arc::new(RelayOrchestrator::new(
            Arc::clone(&factory),
            context.attribute_module,
            context.settings.upstream_entity_id,
        ));

        let mut routes = RouteTable::new();
        let endpoints = SamlIdp::register_endpoints(factory.idp_config())?
            .into_iter()
            .chain(SamlSp::register_endpoints(factory.sp_config())?);
        for (pattern, arity, spec) in endpoints {
            routes.register(&pattern, arity, spec)?;
        }
        tracing::info!(routes = routes.len(), debug = context.debug, "proxy ready");

        Ok(Self {
            routes,
            factory,
            relay,
            debug: context.debug,
        })
    }

    /// Whether errors are returned instead of masked.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Serves one request.
    ///
    /// Traversal attempts and unknown paths always produce their 401/404
    /// pages. Other failures are logged and masked as a generic error page,
    /// except in debug mode where they are returned.
    ///
    /// # Errors
    ///
    /// Only in debug mode: the failure of the handshake step.
    pub async fn handle(&self, mut request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let (spec, args) = match self.routes.resolve(&request.path) {
            Resolution::Matched(spec, args) => (spec, args),
            Resolution::Unauthorized => {
                warn!(path = %request.path, "path traversal attempt");
                return Ok(ProxyResponse::unauthorized());
            }
            Resolution::NotFound => {
                debug!(path = %request.path, "no route");
                return Ok(ProxyResponse::not_found());
            }
        };
        request.route_args = Some(args);

        match self.run_entity(spec, request).await {
            Ok(response) => Ok(response),
            Err(err) if self.debug => Err(err),
            Err(err) => {
                error!(
                    error = %err,
                    role = %spec.role,
                    operation = %spec.operation,
                    "request failed"
                );
                Ok(ProxyResponse::service_error(err.http_status()))
            }
        }
    }

    /// Builds the role instance named by `spec` and runs its operation.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `RouteNotFound` when the spec
    /// names an operation the role does not have.
    pub async fn run_entity(&self, spec: HandlerSpec, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let continuation: Arc<dyn HandshakeContinuation> = self.relay.clone();
        let path = request.path.clone();
        let instance = self.factory.create(spec.role, request, continuation);

        match (instance, spec.operation, spec.binding) {
            (RoleInstance::Idp(idp), Operation::SingleSignOn, Some(binding)) => {
                idp.handle_authn_request(binding).await
            }
            (RoleInstance::Sp(sp), Operation::AssertionConsumer, Some(binding)) => {
                sp.authn_response(binding).await
            }
            (RoleInstance::Sp(sp), Operation::DiscoveryResponse, _) => sp.disco_response().await,
            _ => Err(ProxyError::RouteNotFound(path)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::http::{Method, StatusCode, Uri};
    use s2s_protocol_saml::EntityRole;

    use super::*;
    use crate::attributes::{AttributeModule, SingleAttributeMatcher, StaticAttributeModule};
    use crate::config::ProxySettings;
    use crate::entity::testing::*;
    use crate::store::MemoryRelayStateStore;

    pub(crate) fn proxy(debug: bool) -> Proxy {
        let doc = document(false);
        let module: Arc<dyn AttributeModule> = Arc::new(StaticAttributeModule::new(
            Vec::new(),
            Default::default(),
            Default::default(),
            SingleAttributeMatcher::new("mail", "email"),
        ));
        let context = ProxyContext {
            sp_config: Arc::new(doc.entity_config(EntityRole::Sp).unwrap()),
            idp_config: Arc::new(doc.entity_config(EntityRole::Idp).unwrap()),
            store: Arc::new(MemoryRelayStateStore::new()),
            attribute_module: module,
            settings: ProxySettings {
                discovery_service: None,
                upstream_entity_id: Some(UPSTREAM_ID.to_string()),
                attribute_module: toml::from_str("name = \"static\"").unwrap(),
            },
            debug,
        };
        Proxy::from_context(context).unwrap()
    }

    fn get(path: &str) -> ProxyRequest {
        ProxyRequest::from_parts(Method::GET, &path.parse::<Uri>().unwrap(), b"")
    }

    #[tokio::test]
    async fn traversal_and_unknown_paths_are_pages_in_both_modes() {
        for debug in [false, true] {
            let proxy = proxy(debug);
            let response = proxy.handle(get("/sso/../proxy.toml")).await.unwrap();
            assert_eq!(response.status, StatusCode::UNAUTHORIZED);

            let response = proxy.handle(get("/%2E%2E/%FF")).await.unwrap();
            assert_eq!(response.status, StatusCode::UNAUTHORIZED);

            let response = proxy.handle(get("/nowhere")).await.unwrap();
            assert_eq!(response.status, StatusCode::NOT_FOUND);
            assert_eq!(response.body, "Couldn't find the side you asked for!");
        }
    }

    #[tokio::test]
    async fn failures_are_masked_outside_debug_mode() {
        let response = proxy(false).handle(get("/sso/redirect")).await.unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(!response.body.contains("SAMLRequest"));
    }

    #[tokio::test]
    async fn failures_are_returned_in_debug_mode() {
        let err = proxy(true).handle(get("/sso/redirect")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Saml(_)));
    }

    #[tokio::test]
    async fn operation_mismatch_is_not_found() {
        let spec = HandlerSpec {
            role: EntityRole::Idp,
            operation: Operation::AssertionConsumer,
            binding: None,
        };
        let err = proxy(true).run_entity(spec, get("/x")).await.unwrap_err();
        assert!(matches!(err, ProxyError::RouteNotFound(_)));
    }
}
