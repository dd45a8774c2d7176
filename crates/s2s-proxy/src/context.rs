//! Process-wide proxy context.

use std::sync::Arc;

use s2s_protocol_saml::{EndpointKind, EntityConfig, EntityRole};

use crate::attributes::{AttributeModule, AttributeModuleRegistry};
use crate::config::{ConfigError, ProxyConfig, ProxySettings};
use crate::error::ProxyResult;
use crate::store::RelayStateStore;

/// Everything built once at startup and shared by all requests.
#[derive(Clone)]
pub struct ProxyContext {
    /// SP role configuration.
    pub sp_config: Arc<EntityConfig>,
    /// IdP role configuration.
    pub idp_config: Arc<EntityConfig>,
    /// Correlation store.
    pub store: Arc<dyn RelayStateStore>,
    /// Selected attribute module.
    pub attribute_module: Arc<dyn AttributeModule>,
    /// Proxy settings, with command-line overrides applied.
    pub settings: ProxySettings,
    /// Debug mode: errors reach the transport unmasked.
    pub debug: bool,
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("entity_id", &self.sp_config.entity_id)
            .field("settings", &self.settings)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl ProxyContext {
    /// Builds the context.
    ///
    /// `upstream_override` replaces the configured fixed upstream.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when a role section is invalid, the
    /// attribute module cannot be built, the upstream is not trusted, or
    /// neither an upstream nor a usable discovery service is configured.
    pub fn build(
        config: &ProxyConfig,
        store: Arc<dyn RelayStateStore>,
        registry: &AttributeModuleRegistry,
        debug: bool,
        upstream_override: Option<String>,
    ) -> ProxyResult<Self> {
        let sp_config = config
            .saml
            .entity_config(EntityRole::Sp)
            .map_err(ConfigError::from)?;
        let idp_config = config
            .saml
            .entity_config(EntityRole::Idp)
            .map_err(ConfigError::from)?;

        let mut settings = config.settings.clone();
        if upstream_override.is_some() {
            settings.upstream_entity_id = upstream_override;
        }
        check_upstream_routing(&settings, &sp_config)?;

        let attribute_module = registry
            .build(&settings.attribute_module)
            .map_err(ConfigError::from)?;

        tracing::info!(
            entity_id = %sp_config.entity_id,
            upstream = ?settings.upstream_entity_id,
            discovery = ?settings.discovery_service,
            attribute_module = %settings.attribute_module.name,
            "proxy context built"
        );
        Ok(Self {
            sp_config: Arc::new(sp_config),
            idp_config: Arc::new(idp_config),
            store,
            attribute_module,
            settings,
            debug,
        })
    }
}

fn check_upstream_routing(settings: &ProxySettings, sp: &EntityConfig) -> Result<(), ConfigError> {
    match (&settings.upstream_entity_id, &settings.discovery_service) {
        (Some(upstream), _) => {
            if sp.metadata.identity_provider(upstream).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "upstream identity provider {upstream} is not in trusted metadata"
                )));
            }
        }
        (None, Some(_)) => {
            if sp.endpoints(EndpointKind::DiscoveryResponse).next().is_none() {
                return Err(ConfigError::Invalid(
                    "discovery_service requires a [service.sp] discovery_response endpoint".to_string(),
                ));
            }
        }
        (None, None) => {
            return Err(ConfigError::Invalid(
                "either upstream_entity_id or discovery_service must be set".to_string(),
            ));
        }
    }
    Ok(())
}
