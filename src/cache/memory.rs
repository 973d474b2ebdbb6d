use super::{PriceCache, admits};
use crate::models::{PriceEstimate, PriceKey};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct MemoryPriceCache {
    entries: RwLock<HashMap<PriceKey, PriceEstimate>>,
}

impl MemoryPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl PriceCache for MemoryPriceCache {
    async fn get(&self, key: &PriceKey) -> Option<PriceEstimate> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &PriceKey, estimate: PriceEstimate) -> bool {
        let flagged = estimate.scraping_in_background;
        let estimate = estimate.with_background(flagged);
        let mut guard = self.entries.write().await;
        if !admits(guard.get(key), &estimate) {
            debug!(
                target = "pricectx.cache",
                key = %key,
                "rejected write that would regress cached estimate"
            );
            return false;
        }
        guard.insert(key.clone(), estimate);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConditionPrices, ListingCondition, MarketListing};

    fn ai_estimate() -> PriceEstimate {
        PriceEstimate::ai_only(
            ConditionPrices::range(900.0, 1100.0),
            ConditionPrices::default(),
            ConditionPrices::range(400.0, 600.0),
            "ai-estimate",
            "demo",
        )
    }

    fn market_estimate() -> PriceEstimate {
        PriceEstimate::from_listings(
            vec![MarketListing {
                url: "https://example.com/1".into(),
                price: 750.0,
                source: "test".into(),
                condition: ListingCondition::Used,
                title: Some("Centrifuge".into()),
            }],
            "test",
        )
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let cache = MemoryPriceCache::new();
        assert!(cache.get(&PriceKey::new("a", "b", "c")).await.is_none());
    }

    #[tokio::test]
    async fn marketplace_data_is_never_replaced_by_ai_estimate() {
        let cache = MemoryPriceCache::new();
        let key = PriceKey::new("Eppendorf", "5810R", "Centrifuge");
        assert!(cache.put(&key, ai_estimate()).await);
        assert!(cache.put(&key, market_estimate()).await);
        assert!(!cache.put(&key, ai_estimate().with_background(true)).await);

        let stored = cache.get(&key).await.expect("entry");
        assert!(stored.has_marketplace_data);
        assert!(!stored.scraping_in_background);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn newer_ai_estimate_replaces_older_one() {
        let cache = MemoryPriceCache::new();
        let key = PriceKey::new("Eppendorf", "5810R", "Centrifuge");
        assert!(cache.put(&key, ai_estimate().with_background(true)).await);
        assert!(cache.put(&key, ai_estimate().with_background(false)).await);
        let stored = cache.get(&key).await.expect("entry");
        assert!(!stored.scraping_in_background);
    }
}
