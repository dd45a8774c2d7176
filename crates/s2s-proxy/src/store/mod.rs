//! Correlation state store.
//!
//! Holds the in-flight [`RelayRecord`] of each handshake, keyed by the
//! correlation token that travels through the upstream leg. Records are
//! single use: [`RelayStateStore::take`] reads and removes atomically.

mod memory;
mod redis;

pub use memory::MemoryRelayStateStore;
pub use redis::RedisRelayStateStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use s2s_protocol_saml::{AuthnRequest, SamlBinding};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Correlation store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A live record already uses the key.
    #[error("correlation key already in use: {0}")]
    KeyCollision(String),

    /// No record is stored under the key.
    #[error("correlation key not found: {0}")]
    NotFound(String),

    /// A record could not be (de)serialized.
    #[error("relay record serialization error: {0}")]
    Serialization(String),

    /// The backend failed or is unreachable.
    #[error("relay store backend error: {0}")]
    Backend(String),
}

/// Which leg of the handshake a record is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeStage {
    /// The user is choosing an identity provider at the discovery service.
    AwaitingIdpSelection,
    /// The request has been sent upstream; waiting for the response.
    AwaitingUpstreamResponse,
}

/// Arguments needed to answer the original requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestArgs {
    /// Entity ID of the downstream service provider.
    pub sp_entity_id: String,
    /// Its assertion consumer URL.
    pub destination: String,
    /// Binding of that assertion consumer endpoint.
    pub response_binding: SamlBinding,
    /// ID of the downstream request.
    pub in_response_to: String,
}

/// State of one relayed handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    /// Leg the record belongs to.
    pub stage: HandshakeStage,
    /// The downstream request as received.
    pub authn_request: AuthnRequest,
    /// RelayState sent by the downstream service provider.
    pub relay_state: Option<String>,
    /// Where and how to answer.
    pub request_args: RequestArgs,
}

impl RelayRecord {
    /// Returns the same record moved to `stage`.
    #[must_use]
    pub fn at_stage(mut self, stage: HandshakeStage) -> Self {
        self.stage = stage;
        self
    }
}

/// Storage for in-flight relay records.
#[async_trait]
pub trait RelayStateStore: Send + Sync {
    /// Stores `record` under `key`.
    ///
    /// Fails with `KeyCollision` when `key` is live.
    async fn put(&self, key: &str, record: RelayRecord) -> StoreResult<()>;

    /// Removes and returns the record stored under `key`.
    ///
    /// Fails with `NotFound` when there is none.
    async fn take(&self, key: &str) -> StoreResult<RelayRecord>;
}

/// Creates the store selected by `config`.
///
/// # Errors
///
/// Returns `Backend` if the Redis connection cannot be established.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn RelayStateStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryRelayStateStore::new())),
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| StoreError::Backend("redis backend requires redis_url".to_string()))?;
            let store = RedisRelayStateStore::connect(
                url,
                config.key_prefix.clone(),
                config.ttl_secs.map(Duration::from_secs),
            )
            .await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_record(stage: HandshakeStage) -> RelayRecord {
    RelayRecord {
        stage,
        authn_request: AuthnRequest::new("https://sp.example.com/sp.xml"),
        relay_state: Some("sp-state".to_string()),
        request_args: RequestArgs {
            sp_entity_id: "https://sp.example.com/sp.xml".to_string(),
            destination: "https://sp.example.com/acs/post".to_string(),
            response_binding: SamlBinding::HttpPost,
            in_response_to: "_req".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_survives_json() {
        let record = sample_record(HandshakeStage::AwaitingUpstreamResponse);
        let json = serde_json::to_string(&record).unwrap();
        let back: RelayRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn at_stage_moves_record() {
        let record = sample_record(HandshakeStage::AwaitingIdpSelection)
            .at_stage(HandshakeStage::AwaitingUpstreamResponse);
        assert_eq!(record.stage, HandshakeStage::AwaitingUpstreamResponse);
    }

    #[tokio::test]
    async fn connect_memory_backend() {
        let store = connect(&StoreConfig::default()).await.unwrap();
        store
            .put("_k", sample_record(HandshakeStage::AwaitingIdpSelection))
            .await
            .unwrap();
        assert!(store.take("_k").await.is_ok());
    }

    #[tokio::test]
    async fn redis_backend_requires_url() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            ..StoreConfig::default()
        };
        assert!(matches!(connect(&config).await, Err(StoreError::Backend(_))));
    }
}
