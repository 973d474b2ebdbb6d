use super::{MarketScraper, ScrapeError};
use crate::estimator::base_price;
use crate::models::{ListingCondition, MarketListing, PriceKey};
use async_trait::async_trait;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::time::Duration;
use tokio::time::sleep;

const CONDITIONS: [ListingCondition; 3] = [
    ListingCondition::New,
    ListingCondition::Refurbished,
    ListingCondition::Used,
];

/// Offline stand-in for a marketplace: waits `delay`, then yields listings derived from the key
/// seed. Roughly one key in nine finds nothing, which exercises the AI-only fallback.
#[derive(Debug, Clone)]
pub struct DemoScraper {
    delay: Duration,
}

impl DemoScraper {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl MarketScraper for DemoScraper {
    fn name(&self) -> &'static str {
        "demo-market"
    }

    async fn scrape(&self, key: &PriceKey) -> Result<Vec<MarketListing>, ScrapeError> {
        sleep(self.delay).await;
        let seed = key.seed();
        if seed % 9 == 0 {
            return Ok(Vec::new());
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        let base = base_price(key);
        let count = rng.random_range(3..=8);
        let listings = (0..count)
            .map(|idx| {
                let condition = CONDITIONS[rng.random_range(0..CONDITIONS.len())];
                let factor = match condition {
                    ListingCondition::New => 1.0,
                    ListingCondition::Refurbished => 0.62,
                    ListingCondition::Used => 0.45,
                };
                let price = (base * factor * rng.random_range(0.85..1.15) * 100.0).round() / 100.0;
                MarketListing {
                    url: format!("https://demo.market/listing/{seed:x}-{idx}"),
                    price,
                    source: self.name().to_string(),
                    condition,
                    title: Some(format!(
                        "{} {} ({})",
                        key.brand(),
                        key.model(),
                        condition.label()
                    )),
                }
            })
            .collect();
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn demo_listings_are_deterministic() {
        let scraper = DemoScraper::new(Duration::from_secs(20));
        let key = PriceKey::new("Thermo Fisher", "TSQ Altis", "Mass Spectrometer");
        let a = scraper.scrape(&key).await.expect("scrape");
        let b = scraper.scrape(&key).await.expect("scrape");
        assert_eq!(a, b);
        assert!(a.iter().all(|listing| listing.price > 0.0));
    }
}
