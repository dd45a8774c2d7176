//! Redis relay store, for proxies running as several replicas.

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;

use super::{RelayRecord, RelayStateStore, StoreError, StoreResult};

/// Relay store backed by Redis.
///
/// `put` is `SET NX` with an optional expiry and `take` is `GETDEL`, so a
/// record is handed out at most once across all replicas.
pub struct RedisRelayStateStore {
    client: Client,
    key_prefix: String,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for RedisRelayStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRelayStateStore")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisRelayStateStore {
    /// Connects to Redis at `url`.
    ///
    /// ## Errors
    ///
    /// Returns `Backend` if the URL is invalid or the connection fails.
    pub async fn connect(url: &str, key_prefix: String, ttl: Option<Duration>) -> StoreResult<Self> {
        let config = Config::from_url(url).map_err(from_redis_error)?;
        let client = Client::new(
            config,
            None,
            None,
            Some(ReconnectPolicy::new_exponential(0, 1000, 30_000, 2)),
        );
        client.init().await.map_err(from_redis_error)?;

        tracing::info!(prefix = %key_prefix, "connected relay store to redis");
        Ok(Self {
            client,
            key_prefix,
            ttl,
        })
    }

    fn key(&self, key: &str) -> String {
        prefixed_key(&self.key_prefix, key)
    }
}

fn prefixed_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

/// Redis expiry in seconds, saturating at `i64::MAX`.
fn seconds_to_i64(seconds: u64) -> i64 {
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

#[allow(clippy::needless_pass_by_value)]
fn from_redis_error(err: fred::error::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl RelayStateStore for RedisRelayStateStore {
    async fn put(&self, key: &str, record: RelayRecord) -> StoreResult<()> {
        let serialized =
            serde_json::to_string(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let expiration = self
            .ttl
            .map(|ttl| Expiration::EX(seconds_to_i64(ttl.as_secs().max(1))));

        let stored: Option<String> = self
            .client
            .set(self.key(key), serialized, expiration, Some(SetOptions::NX), false)
            .await
            .map_err(from_redis_error)?;

        match stored {
            Some(_) => Ok(()),
            None => Err(StoreError::KeyCollision(key.to_string())),
        }
    }

    async fn take(&self, key: &str) -> StoreResult<RelayRecord> {
        let value: Option<String> = self
            .client
            .getdel(self.key(key))
            .await
            .map_err(from_redis_error)?;

        let value = value.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        serde_json::from_str(&value).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}
