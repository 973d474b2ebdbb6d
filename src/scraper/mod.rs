//! Marketplace scraping routines run by the job coordinator.

mod demo;

pub use demo::DemoScraper;

use crate::models::{MarketListing, PriceKey};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("marketplace auth failed: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Slow (up to minutes) search for real listings of one piece of equipment.
#[async_trait]
pub trait MarketScraper: Send + Sync {
    fn name(&self) -> &'static str;

    async fn scrape(&self, key: &PriceKey) -> Result<Vec<MarketListing>, ScrapeError>;
}
