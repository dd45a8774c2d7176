//! Entity configuration and trusted metadata.
//!
//! One TOML document describes the local entity in both of its roles, its
//! signing credentials and the remote entities it trusts. Relative file
//! paths are resolved against the directory holding the document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::error::{SamlError, SamlResult};
use crate::signature::{pem_to_der, SignatureAlgorithm, SignatureConfig, XmlSignatureValidator, XmlSigner};
use crate::types::SamlBinding;

/// Default tolerance for clock differences between entities, in seconds.
pub const DEFAULT_ACCEPTED_TIME_DIFF: i64 = 60;

/// The role an entity configuration is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRole {
    /// Service provider facing upstream identity providers.
    Sp,
    /// Identity provider facing downstream service providers.
    Idp,
}

impl std::fmt::Display for EntityRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sp => f.write_str("sp"),
            Self::Idp => f.write_str("idp"),
        }
    }
}

/// Kinds of service endpoint an entity exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// IdP single sign-on service.
    SingleSignOn,
    /// SP assertion consumer service.
    AssertionConsumer,
    /// SP discovery response endpoint.
    DiscoveryResponse,
}

/// A service endpoint: URL plus binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    /// Absolute endpoint URL.
    pub url: String,
    /// Binding served at the URL.
    #[serde(deserialize_with = "deserialize_binding")]
    pub binding: SamlBinding,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>, binding: SamlBinding) -> Self {
        Self {
            url: url.into(),
            binding,
        }
    }

    /// Returns the URL path without its leading `/`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the URL cannot be parsed.
    pub fn path(&self) -> SamlResult<String> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| SamlError::Configuration(format!("invalid endpoint URL {}: {e}", self.url)))?;
        Ok(url.path().trim_start_matches('/').to_string())
    }
}

fn deserialize_binding<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SamlBinding, D::Error> {
    let value = String::deserialize(deserializer)?;
    SamlBinding::parse(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown binding: {value}")))
}

/// A remote entity from trusted metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntity {
    /// Entity ID.
    pub entity_id: String,
    /// Single sign-on endpoints (identity providers).
    pub single_sign_on_service: Vec<Endpoint>,
    /// Assertion consumer endpoints (service providers).
    pub assertion_consumer_service: Vec<Endpoint>,
    /// DER certificates used to verify the entity's signatures.
    pub certificates: Vec<Vec<u8>>,
}

impl RemoteEntity {
    /// Creates an entity with no endpoints or certificates.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            single_sign_on_service: Vec::new(),
            assertion_consumer_service: Vec::new(),
            certificates: Vec::new(),
        }
    }

    /// Picks an SSO endpoint, preferring `binding`, else the first one.
    #[must_use]
    pub fn sso_endpoint(&self, binding: SamlBinding) -> Option<&Endpoint> {
        self.single_sign_on_service
            .iter()
            .find(|e| e.binding == binding)
            .or_else(|| self.single_sign_on_service.first())
    }

    /// A validator trusting this entity's certificates.
    #[must_use]
    pub fn signature_validator(&self) -> XmlSignatureValidator {
        XmlSignatureValidator::new(self.certificates.clone())
    }
}

/// Remote entities the proxy trusts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedMetadata {
    identity_providers: BTreeMap<String, RemoteEntity>,
    service_providers: BTreeMap<String, RemoteEntity>,
}

impl TrustedMetadata {
    /// Adds a trusted identity provider.
    pub fn add_identity_provider(&mut self, entity: RemoteEntity) {
        self.identity_providers.insert(entity.entity_id.clone(), entity);
    }

    /// Adds a trusted service provider.
    pub fn add_service_provider(&mut self, entity: RemoteEntity) {
        self.service_providers.insert(entity.entity_id.clone(), entity);
    }

    /// Looks up a trusted identity provider.
    #[must_use]
    pub fn identity_provider(&self, entity_id: &str) -> Option<&RemoteEntity> {
        self.identity_providers.get(entity_id)
    }

    /// Looks up a trusted service provider.
    #[must_use]
    pub fn service_provider(&self, entity_id: &str) -> Option<&RemoteEntity> {
        self.service_providers.get(entity_id)
    }

    /// Iterates over trusted identity providers.
    pub fn identity_providers(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.identity_providers.values()
    }
}

/// Configuration of the local entity acting in one role.
#[derive(Debug, Clone)]
pub struct EntityConfig {
    /// Role this configuration serves.
    pub role: EntityRole,
    /// Local entity ID.
    pub entity_id: String,
    /// Endpoints exposed in this role, in declaration order.
    pub endpoints: Vec<(EndpointKind, Endpoint)>,
    /// Signer for outgoing messages; always present for the IdP role.
    pub signer: Option<XmlSigner>,
    /// Accepted clock difference for assertion conditions.
    pub accepted_time_diff: chrono::Duration,
    /// Trusted remote entities.
    pub metadata: Arc<TrustedMetadata>,
}

impl EntityConfig {
    /// Endpoints of one kind.
    pub fn endpoints(&self, kind: EndpointKind) -> impl Iterator<Item = &Endpoint> {
        self.endpoints
            .iter()
            .filter(move |(k, _)| *k == kind)
            .map(|(_, e)| e)
    }

    /// First endpoint of `kind`, preferring `binding`.
    #[must_use]
    pub fn endpoint(&self, kind: EndpointKind, binding: Option<SamlBinding>) -> Option<&Endpoint> {
        binding
            .and_then(|b| self.endpoints(kind).find(|e| e.binding == b))
            .or_else(|| self.endpoints(kind).next())
    }

    /// Whether `url` is one of this entity's endpoints of `kind`.
    #[must_use]
    pub fn has_endpoint_url(&self, kind: EndpointKind, url: &str) -> bool {
        self.endpoints(kind).any(|e| e.url == url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoints {
    #[serde(default)]
    single_sign_on_service: Vec<Endpoint>,
    #[serde(default)]
    assertion_consumer_service: Vec<Endpoint>,
    #[serde(default)]
    discovery_response: Vec<Endpoint>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    idp: Option<RawEndpoints>,
    sp: Option<RawEndpoints>,
}

#[derive(Debug, Deserialize)]
struct RawRemoteEntity {
    entity_id: String,
    #[serde(default)]
    single_sign_on_service: Vec<Endpoint>,
    #[serde(default)]
    assertion_consumer_service: Vec<Endpoint>,
    #[serde(default)]
    certificate_files: Vec<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    identity_providers: Vec<RawRemoteEntity>,
    #[serde(default)]
    service_providers: Vec<RawRemoteEntity>,
}

/// Fields of the document read by this crate. Other top-level keys are
/// left to the application.
#[derive(Debug, Deserialize)]
struct RawDocument {
    entity_id: String,
    key_file: Option<PathBuf>,
    cert_file: Option<PathBuf>,
    signature_algorithm: Option<String>,
    accepted_time_diff: Option<i64>,
    #[serde(default)]
    service: RawService,
    #[serde(default)]
    metadata: RawMetadata,
}

/// A loaded configuration document covering both roles.
#[derive(Debug, Clone)]
pub struct SamlConfigDocument {
    entity_id: String,
    signer: Option<XmlSigner>,
    accepted_time_diff: chrono::Duration,
    idp_service: Option<ServiceEndpoints>,
    sp_service: Option<ServiceEndpoints>,
    metadata: Arc<TrustedMetadata>,
}

#[derive(Debug, Clone)]
struct ServiceEndpoints {
    endpoints: Vec<(EndpointKind, Endpoint)>,
}

impl From<RawEndpoints> for ServiceEndpoints {
    fn from(raw: RawEndpoints) -> Self {
        let endpoints = raw
            .single_sign_on_service
            .into_iter()
            .map(|e| (EndpointKind::SingleSignOn, e))
            .chain(
                raw.assertion_consumer_service
                    .into_iter()
                    .map(|e| (EndpointKind::AssertionConsumer, e)),
            )
            .chain(
                raw.discovery_response
                    .into_iter()
                    .map(|e| (EndpointKind::DiscoveryResponse, e)),
            )
            .collect();
        Self { endpoints }
    }
}

impl SamlConfigDocument {
    /// Loads a document from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> SamlResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SamlError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&text, base_dir)
    }

    /// Parses a document, resolving relative paths against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for invalid TOML, unreadable key or
    /// certificate files, or an unknown signature algorithm.
    pub fn from_toml_str(text: &str, base_dir: &Path) -> SamlResult<Self> {
        let raw: RawDocument = toml::from_str(text)
            .map_err(|e| SamlError::Configuration(format!("invalid SAML configuration: {e}")))?;

        let algorithm = match raw.signature_algorithm.as_deref() {
            Some(name) => SignatureAlgorithm::parse(name).ok_or_else(|| {
                SamlError::Configuration(format!("unknown signature algorithm: {name}"))
            })?,
            None => SignatureAlgorithm::default(),
        };

        let signer = match (&raw.key_file, &raw.cert_file) {
            (Some(key_file), cert_file) => {
                let key_pem = read_file(base_dir, key_file)?;
                let cert_pem = cert_file
                    .as_ref()
                    .map(|path| read_file(base_dir, path))
                    .transpose()?;
                let signer = XmlSigner::from_pem(&key_pem, cert_pem.as_deref())?.with_config(
                    SignatureConfig {
                        algorithm,
                        ..SignatureConfig::default()
                    },
                );
                Some(signer)
            }
            (None, Some(_)) => {
                return Err(SamlError::Configuration(
                    "cert_file is set without key_file".to_string(),
                ))
            }
            (None, None) => None,
        };

        let mut metadata = TrustedMetadata::default();
        for raw_idp in raw.metadata.identity_providers {
            metadata.add_identity_provider(remote_entity(raw_idp, base_dir)?);
        }
        for raw_sp in raw.metadata.service_providers {
            metadata.add_service_provider(remote_entity(raw_sp, base_dir)?);
        }

        Ok(Self {
            entity_id: raw.entity_id,
            signer,
            accepted_time_diff: chrono::Duration::seconds(
                raw.accepted_time_diff.unwrap_or(DEFAULT_ACCEPTED_TIME_DIFF),
            ),
            idp_service: raw.service.idp.map(Into::into),
            sp_service: raw.service.sp.map(Into::into),
            metadata: Arc::new(metadata),
        })
    }

    /// The local entity ID.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// The trusted metadata shared by both roles.
    #[must_use]
    pub fn metadata(&self) -> &Arc<TrustedMetadata> {
        &self.metadata
    }

    /// Builds the configuration for one role.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the role's service section is missing,
    /// or if the IdP role has no signing credentials.
    pub fn entity_config(&self, role: EntityRole) -> SamlResult<EntityConfig> {
        let service = match role {
            EntityRole::Idp => &self.idp_service,
            EntityRole::Sp => &self.sp_service,
        };
        let service = service
            .as_ref()
            .ok_or_else(|| SamlError::Configuration(format!("missing [service.{role}] section")))?;

        if role == EntityRole::Idp && self.signer.is_none() {
            return Err(SamlError::Configuration(
                "the idp role requires key_file and cert_file".to_string(),
            ));
        }

        Ok(EntityConfig {
            role,
            entity_id: self.entity_id.clone(),
            endpoints: service.endpoints.clone(),
            signer: self.signer.clone(),
            accepted_time_diff: self.accepted_time_diff,
            metadata: Arc::clone(&self.metadata),
        })
    }
}

fn remote_entity(raw: RawRemoteEntity, base_dir: &Path) -> SamlResult<RemoteEntity> {
    let certificates = raw
        .certificate_files
        .iter()
        .map(|path| {
            let pem = read_file(base_dir, path)?;
            pem_to_der(&pem, "CERTIFICATE").ok_or_else(|| {
                SamlError::Configuration(format!("no certificate in {}", path.display()))
            })
        })
        .collect::<SamlResult<Vec<_>>>()?;

    Ok(RemoteEntity {
        entity_id: raw.entity_id,
        single_sign_on_service: raw.single_sign_on_service,
        assertion_consumer_service: raw.assertion_consumer_service,
        certificates,
    })
}

fn read_file(base_dir: &Path, path: &Path) -> SamlResult<String> {
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    std::fs::read_to_string(&full)
        .map_err(|e| SamlError::Configuration(format!("cannot read {}: {e}", full.display())))
}
