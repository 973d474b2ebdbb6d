//! Latest price estimate per key.
//!
//! Entries never expire. A write only lands when it supersedes what is stored (see
//! [`PriceEstimate::supersedes`]), so marketplace data is never rolled back to an AI estimate.

mod memory;
mod redis_cache;

pub use memory::MemoryPriceCache;
pub use redis_cache::RedisPriceCache;

use crate::models::{PriceEstimate, PriceKey};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("invalid cached payload: {0}")]
    Payload(String),
}

#[async_trait]
pub trait PriceCache: Send + Sync {
    /// Storage failures are logged by the backend and read as a miss.
    async fn get(&self, key: &PriceKey) -> Option<PriceEstimate>;

    /// Returns whether the estimate was stored.
    async fn put(&self, key: &PriceKey, estimate: PriceEstimate) -> bool;
}

/// Write rule shared by every backend: an empty slot takes anything, otherwise the incoming
/// estimate must supersede the stored one.
pub(crate) fn admits(existing: Option<&PriceEstimate>, incoming: &PriceEstimate) -> bool {
    existing.is_none_or(|existing| incoming.supersedes(existing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConditionPrices, ListingCondition, MarketListing};

    fn ai() -> PriceEstimate {
        PriceEstimate::ai_only(
            ConditionPrices::range(900.0, 1100.0),
            ConditionPrices::default(),
            ConditionPrices::range(400.0, 600.0),
            "ai-estimate",
            "demo",
        )
    }

    fn market() -> PriceEstimate {
        PriceEstimate::from_listings(
            vec![MarketListing {
                url: "https://example.com/1".into(),
                price: 750.0,
                source: "test".into(),
                condition: ListingCondition::Used,
                title: None,
            }],
            "test",
        )
    }

    #[test]
    fn empty_slot_admits_any_estimate() {
        assert!(admits(None, &ai()));
        assert!(admits(None, &market()));
    }

    #[test]
    fn marketplace_entry_rejects_later_ai_write() {
        let stored = market();
        assert!(!admits(Some(&stored), &ai().restamped()));
        assert!(admits(Some(&stored), &market().restamped()));
        assert!(admits(Some(&ai()), &stored));
    }

    #[test]
    fn older_ai_write_is_rejected() {
        let stored = ai();
        let mut older = ai();
        older.cached_at = stored.cached_at - chrono::Duration::seconds(5);
        assert!(!admits(Some(&stored), &older));
        assert!(admits(Some(&stored), &stored.clone().restamped()));
    }
}
