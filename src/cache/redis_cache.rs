use super::{CacheError, PriceCache, admits};
use crate::models::{PriceEstimate, PriceKey};
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};

/// One JSON value per key under `price-context:{brand}|{model}|{category}`, no expiry.
///
/// The read-compare-write in `put` is not atomic across processes; within one process the
/// single-flight coordinator is the only writer for a key while its job runs.
#[derive(Clone)]
pub struct RedisPriceCache {
    client: redis::Client,
}

impl RedisPriceCache {
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|err| CacheError::Connection(err.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| CacheError::Connection(err.to_string()))
    }

    async fn fetch(&self, key: &PriceKey) -> Result<Option<PriceEstimate>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(key.storage_key())
            .await
            .map_err(|err| CacheError::Command(err.to_string()))?;
        raw.map(|value| {
            serde_json::from_str(&value).map_err(|err| CacheError::Payload(err.to_string()))
        })
        .transpose()
    }

    async fn store(&self, key: &PriceKey, estimate: &PriceEstimate) -> Result<(), CacheError> {
        let json =
            serde_json::to_string(estimate).map_err(|err| CacheError::Payload(err.to_string()))?;
        let mut conn = self.connection().await?;
        let _: () = conn
            .set(key.storage_key(), json)
            .await
            .map_err(|err| CacheError::Command(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl PriceCache for RedisPriceCache {
    async fn get(&self, key: &PriceKey) -> Option<PriceEstimate> {
        match self.fetch(key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(target = "pricectx.cache", key = %key, error = %err, "cache_read_failed");
                None
            }
        }
    }

    async fn put(&self, key: &PriceKey, estimate: PriceEstimate) -> bool {
        let flagged = estimate.scraping_in_background;
        let estimate = estimate.with_background(flagged);
        let existing = match self.fetch(key).await {
            Ok(existing) => existing,
            // Unreadable entries are overwritten.
            Err(err) => {
                warn!(target = "pricectx.cache", key = %key, error = %err, "cache_read_before_write_failed");
                None
            }
        };
        if !admits(existing.as_ref(), &estimate) {
            debug!(
                target = "pricectx.cache",
                key = %key,
                "rejected write that would regress cached estimate"
            );
            return false;
        }
        match self.store(key, &estimate).await {
            Ok(()) => true,
            Err(err) => {
                warn!(target = "pricectx.cache", key = %key, error = %err, "cache_write_failed");
                false
            }
        }
    }
}
