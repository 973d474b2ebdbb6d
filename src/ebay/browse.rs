#![allow(non_snake_case)]

use crate::ebay::auth::AppTokenCache;
use crate::ebay::config::{BROWSE_SCOPES, BROWSE_SEARCH_URL, MARKETPLACE, SEARCH_LIMIT};
use crate::http::build_client;
use crate::models::{ListingCondition, MarketListing, PriceKey};
use crate::scraper::{MarketScraper, ScrapeError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    itemSummaries: Vec<ItemSummary>,
}

#[derive(Debug, Deserialize)]
struct ItemSummary {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    itemWebUrl: Option<String>,
    #[serde(default)]
    price: Option<Amount>,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: String,
    #[serde(default)]
    currency: Option<String>,
}

/// Searches eBay's Browse API for active listings of the key's brand and model.
pub struct EbayBrowseScraper {
    http: Client,
    tokens: AppTokenCache,
}

impl EbayBrowseScraper {
    pub fn new() -> Self {
        let http = build_client();
        Self {
            tokens: AppTokenCache::new(http.clone(), BROWSE_SCOPES),
            http,
        }
    }
}

impl Default for EbayBrowseScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketScraper for EbayBrowseScraper {
    fn name(&self) -> &'static str {
        "ebay"
    }

    async fn scrape(&self, key: &PriceKey) -> Result<Vec<MarketListing>, ScrapeError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|err| ScrapeError::Auth(err.to_string()))?;
        let limit = SEARCH_LIMIT.to_string();
        let query = key.search_query();
        let response = self
            .http
            .get(BROWSE_SEARCH_URL.as_str())
            .bearer_auth(token)
            .header("X-EBAY-C-MARKETPLACE-ID", MARKETPLACE.ebay_code())
            .query(&[("q", query.as_str()), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|err| ScrapeError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ScrapeError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|err| ScrapeError::Deserialize(err.to_string()))?;
        let total = payload.itemSummaries.len();
        let listings: Vec<MarketListing> = payload
            .itemSummaries
            .into_iter()
            .filter_map(|item| listing_from_summary(item, self.name()))
            .collect();
        debug!(
            target = "pricectx.jobs",
            key = %key,
            returned = total,
            usable = listings.len(),
            "ebay browse search finished"
        );
        Ok(listings)
    }
}

fn listing_from_summary(item: ItemSummary, source: &str) -> Option<MarketListing> {
    let condition = ListingCondition::classify(item.condition.as_deref()?)?;
    let amount = item.price?;
    if amount
        .currency
        .as_deref()
        .is_some_and(|currency| currency != MARKETPLACE.currency())
    {
        return None;
    }
    let price = amount.value.trim().parse::<f64>().ok().filter(|p| *p > 0.0)?;
    Some(MarketListing {
        url: item.itemWebUrl?,
        price,
        source: source.to_string(),
        condition,
        title: item.title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_map_to_listings() {
        let payload: SearchResponse = serde_json::from_value(serde_json::json!({
            "itemSummaries": [
                {
                    "title": "Thermo TSQ Altis triple quad",
                    "itemWebUrl": "https://www.ebay.com/itm/1",
                    "price": {"value": "185000.00", "currency": "USD"},
                    "condition": "Used"
                },
                {
                    "title": "TSQ Altis source parts",
                    "itemWebUrl": "https://www.ebay.com/itm/2",
                    "price": {"value": "900.00", "currency": "USD"},
                    "condition": "For parts or not working"
                },
                {
                    "itemWebUrl": "https://www.ebay.com/itm/3",
                    "condition": "New"
                }
            ]
        }))
        .expect("payload");
        let listings: Vec<MarketListing> = payload
            .itemSummaries
            .into_iter()
            .filter_map(|item| listing_from_summary(item, "ebay"))
            .collect();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].condition, ListingCondition::Used);
        assert_eq!(listings[0].price, 185000.0);
    }
}
