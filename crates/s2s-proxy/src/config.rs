//! Proxy and server configuration.
//!
//! The proxy configuration is the SAML document read by
//! `s2s-protocol-saml` plus the proxy's own keys (`discovery_service`,
//! `upstream_entity_id`, `[attribute_module]`). The server configuration
//! holds the listener, static assets and correlation store settings.

use std::path::{Path, PathBuf};

use s2s_protocol_saml::{SamlConfigDocument, SamlError};
use serde::Deserialize;
use thiserror::Error;

use crate::attributes::{AttributeError, AttributeModuleConfig};

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid TOML for its schema.
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// The SAML part of the proxy configuration is invalid.
    #[error("invalid SAML configuration: {0}")]
    Saml(#[from] SamlError),

    /// The attribute module cannot be built.
    #[error("attribute module: {0}")]
    AttributeModule(#[from] AttributeError),

    /// Settings are individually valid but cannot work together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Proxy-specific keys of the proxy configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProxySettings {
    /// Discovery service URL used when no upstream is fixed.
    #[serde(default)]
    pub discovery_service: Option<String>,
    /// Fixed upstream identity provider, bypassing discovery.
    #[serde(default)]
    pub upstream_entity_id: Option<String>,
    /// Attribute module selection and options.
    pub attribute_module: AttributeModuleConfig,
}

/// The loaded proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// SAML entity configuration for both roles.
    pub saml: SamlConfigDocument,
    /// Proxy settings.
    pub settings: ProxySettings,
}

impl ProxyConfig {
    /// Loads the proxy configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or either part
    /// of it is invalid.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = read(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&text, base_dir).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parses a proxy configuration, resolving paths against `base_dir`.
    ///
    /// # Errors
    ///
    /// See [`ProxyConfig::load`].
    pub fn from_toml_str(text: &str, base_dir: &Path) -> ConfigResult<Self> {
        let saml = SamlConfigDocument::from_toml_str(text, base_dir)?;
        let settings: ProxySettings = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        Ok(Self { saml, settings })
    }
}

/// Correlation store backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map.
    #[default]
    Memory,
    /// Redis, shared between replicas.
    Redis,
}

/// The `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis connection URL.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Record expiry in seconds (Redis only).
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Key prefix (Redis only).
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            ttl_secs: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    "s2s:relay".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8087
}

/// The `[tls]` section. Without it the server speaks plain HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    /// PEM server certificate.
    pub cert_file: PathBuf,
    /// PEM private key.
    pub key_file: PathBuf,
    /// PEM intermediates sent after the certificate.
    #[serde(default)]
    pub chain_file: Option<PathBuf>,
}

impl TlsConfig {
    /// Reads the certificate chain and key as PEM bytes.
    ///
    /// # Errors
    ///
    /// Returns `Io` for an unreadable file.
    pub fn read_pem(&self) -> ConfigResult<(Vec<u8>, Vec<u8>)> {
        let mut chain = read(&self.cert_file)?;
        if let Some(path) = &self.chain_file {
            if !chain.ends_with('\n') {
                chain.push('\n');
            }
            chain.push_str(&read(path)?);
        }
        Ok((chain.into_bytes(), read(&self.key_file)?.into_bytes()))
    }

    fn resolve(&mut self, base_dir: &Path) {
        let paths = [Some(&mut self.cert_file), Some(&mut self.key_file), self.chain_file.as_mut()];
        for path in paths.into_iter().flatten() {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served at `/static` and for `/robots.txt`.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// Correlation store.
    #[serde(default)]
    pub store: StoreConfig,
    /// HTTPS listener settings.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
            store: StoreConfig::default(),
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Loads the server configuration from `path`. Relative `static_dir`
    /// and TLS file paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = read(path)?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(dir) = config.static_dir.as_mut() {
            if dir.is_relative() {
                *dir = base_dir.join(&*dir);
            }
        }
        if let Some(tls) = config.tls.as_mut() {
            tls.resolve(base_dir);
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that depend on each other.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` when the Redis backend has no URL.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "store.backend = \"redis\" requires store.redis_url".to_string(),
            ));
        }
        Ok(())
    }

    /// URL scheme the listener serves.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }

    /// The socket address string to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn read(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = r#"
        entity_id = "https://proxy.example.com/proxy.xml"
        discovery_service = "https://disco.example.com/ds"

        [service.sp]
        assertion_consumer_service = [
            { url = "https://proxy.example.com/acs/post", binding = "post" },
        ]

        [attribute_module]
        name = "static"
        idp_attribute = "mail"
        backing_attribute = "email"
    "#;

    #[test]
    fn proxy_settings_share_the_document() {
        let config = ProxyConfig::from_toml_str(PROXY, Path::new(".")).unwrap();
        assert_eq!(config.saml.entity_id(), "https://proxy.example.com/proxy.xml");
        assert_eq!(
            config.settings.discovery_service.as_deref(),
            Some("https://disco.example.com/ds")
        );
        assert_eq!(config.settings.upstream_entity_id, None);
        assert_eq!(config.settings.attribute_module.name, "static");
        assert!(config.settings.attribute_module.options.contains_key("idp_attribute"));
    }

    #[test]
    fn missing_attribute_module_is_a_parse_error() {
        let text = "entity_id = \"https://proxy.example.com/proxy.xml\"";
        let err = ProxyConfig::from_toml_str(text, Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn server_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "").unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:8087");
    }

    #[test]
    fn static_dir_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "port = 9000\nstatic_dir = \"assets\"\n").unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.static_dir, Some(dir.path().join("assets")));
    }

    #[test]
    fn redis_backend_needs_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[store]\nbackend = \"redis\"\n").unwrap();
        assert!(matches!(
            ServerConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn tls_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "[tls]\ncert_file = \"pki/server.crt\"\nkey_file = \"/etc/s2s/server.key\"\n",
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.scheme(), "https");
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_file, dir.path().join("pki/server.crt"));
        assert_eq!(tls.key_file, PathBuf::from("/etc/s2s/server.key"));
        assert_eq!(tls.chain_file, None);
    }

    #[test]
    fn tls_requires_cert_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[tls]\ncert_file = \"server.crt\"\n").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn tls_chain_follows_certificate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.crt"), "LEAF").unwrap();
        std::fs::write(dir.path().join("chain.crt"), "INTERMEDIATE\n").unwrap();
        std::fs::write(dir.path().join("server.key"), "KEY\n").unwrap();
        let tls = TlsConfig {
            cert_file: dir.path().join("server.crt"),
            key_file: dir.path().join("server.key"),
            chain_file: Some(dir.path().join("chain.crt")),
        };

        let (chain, key) = tls.read_pem().unwrap();
        assert_eq!(chain, b"LEAF\nINTERMEDIATE\n");
        assert_eq!(key, b"KEY\n");

        let missing = TlsConfig {
            key_file: dir.path().join("absent.key"),
            ..tls
        };
        assert!(matches!(missing.read_pem(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ServerConfig::load(Path::new("/nonexistent/server.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/server.toml"));
    }
}
