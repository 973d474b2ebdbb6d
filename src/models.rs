use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;

/// Normalized (brand, model, category) tuple addressing one cache entry and one job slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PriceKey {
    brand: String,
    model: String,
    category: String,
}

impl PriceKey {
    pub fn new(brand: &str, model: &str, category: &str) -> Self {
        Self {
            brand: normalize(brand),
            model: normalize(model),
            category: normalize(category),
        }
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn storage_key(&self) -> String {
        format!(
            "price-context:{}|{}|{}",
            self.brand, self.model, self.category
        )
    }

    pub fn search_query(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }

    /// FNV-1a over the storage key: the same value in every process and toolchain.
    pub fn seed(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        self.storage_key()
            .bytes()
            .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.brand, self.model, self.category)
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Raw request body / query for both price endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceRequest {
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub category: String,
}

impl PriceRequest {
    pub fn new(brand: &str, model: &str, category: &str) -> Self {
        Self {
            brand: brand.to_string(),
            model: model.to_string(),
            category: category.to_string(),
        }
    }

    pub fn key(&self) -> PriceKey {
        PriceKey::new(&self.brand, &self.model, &self.category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingCondition {
    New,
    Refurbished,
    Used,
}

impl ListingCondition {
    /// Maps a marketplace's free-text condition label. Parts-only listings are not priced.
    pub fn classify(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        if label.is_empty() || label.contains("parts") || label.contains("not working") {
            return None;
        }
        if label.contains("refurb") {
            return Some(ListingCondition::Refurbished);
        }
        if label.starts_with("new") || label.contains("brand new") || label.contains("open box") {
            return Some(ListingCondition::New);
        }
        if label.contains("used") || label.contains("pre-owned") || label.contains("preowned") {
            return Some(ListingCondition::Used);
        }
        None
    }

    pub fn label(&self) -> &'static str {
        match self {
            ListingCondition::New => "new",
            ListingCondition::Refurbished => "refurbished",
            ListingCondition::Used => "used",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionPrices {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub count: Option<u32>,
}

impl ConditionPrices {
    pub fn range(min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: Some(round_cents(min)),
            max: Some(round_cents(max)),
            avg: Some(round_cents((min + max) / 2.0)),
            count: None,
        }
    }

    pub fn from_prices(prices: &[f64]) -> Self {
        if prices.is_empty() {
            return Self::default();
        }
        let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = prices.iter().sum::<f64>() / prices.len() as f64;
        Self {
            min: Some(round_cents(min)),
            max: Some(round_cents(max)),
            avg: Some(round_cents(avg)),
            count: Some(prices.len() as u32),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.avg.is_none()
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub url: String,
    pub price: f64,
    pub source: String,
    pub condition: ListingCondition,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEstimate {
    pub new: ConditionPrices,
    pub refurbished: ConditionPrices,
    pub used: ConditionPrices,
    pub source: String,
    pub breakdown: String,
    pub has_marketplace_data: bool,
    pub scraping_in_background: bool,
    #[serde(default)]
    pub listings: Vec<MarketListing>,
    pub cached_at: DateTime<Utc>,
}

impl PriceEstimate {
    pub fn ai_only(
        new: ConditionPrices,
        refurbished: ConditionPrices,
        used: ConditionPrices,
        source: impl Into<String>,
        breakdown: impl Into<String>,
    ) -> Self {
        Self {
            new,
            refurbished,
            used,
            source: source.into(),
            breakdown: breakdown.into(),
            has_marketplace_data: false,
            scraping_in_background: false,
            listings: Vec::new(),
            cached_at: Utc::now(),
        }
    }

    /// Builds an estimate from scraped listings. Listings without a positive price are dropped;
    /// the result only claims marketplace data when at least one listing survives.
    pub fn from_listings(listings: Vec<MarketListing>, source: impl Into<String>) -> Self {
        let listings: Vec<MarketListing> = listings
            .into_iter()
            .filter(|listing| listing.price.is_finite() && listing.price > 0.0)
            .collect();
        let prices_for = |condition: ListingCondition| {
            listings
                .iter()
                .filter(|listing| listing.condition == condition)
                .map(|listing| listing.price)
                .collect::<Vec<_>>()
        };
        let new = ConditionPrices::from_prices(&prices_for(ListingCondition::New));
        let refurbished = ConditionPrices::from_prices(&prices_for(ListingCondition::Refurbished));
        let used = ConditionPrices::from_prices(&prices_for(ListingCondition::Used));
        let breakdown = format!(
            "Based on {} marketplace listings ({} new, {} refurbished, {} used)",
            listings.len(),
            new.count.unwrap_or(0),
            refurbished.count.unwrap_or(0),
            used.count.unwrap_or(0),
        );
        Self {
            new,
            refurbished,
            used,
            source: source.into(),
            breakdown,
            has_marketplace_data: !listings.is_empty(),
            scraping_in_background: false,
            listings,
            cached_at: Utc::now(),
        }
    }

    /// Empty stand-in returned while a job is running and nothing is cached yet.
    pub fn pending() -> Self {
        Self {
            new: ConditionPrices::default(),
            refurbished: ConditionPrices::default(),
            used: ConditionPrices::default(),
            source: "pending".to_string(),
            breakdown: "Searching marketplaces for comparable listings".to_string(),
            has_marketplace_data: false,
            scraping_in_background: true,
            listings: Vec::new(),
            cached_at: Utc::now(),
        }
    }

    /// Marketplace data never carries the background flag.
    pub fn with_background(mut self, scraping: bool) -> Self {
        self.scraping_in_background = scraping && !self.has_marketplace_data;
        self
    }

    pub fn restamped(mut self) -> Self {
        self.cached_at = Utc::now();
        self
    }

    /// Nothing further will be written for this key until another trigger.
    pub fn is_terminal(&self) -> bool {
        self.has_marketplace_data || !self.scraping_in_background
    }

    pub fn has_prices(&self) -> bool {
        !(self.new.is_empty() && self.refurbished.is_empty() && self.used.is_empty())
    }

    /// Whether this estimate may replace `existing` in the cache.
    pub fn supersedes(&self, existing: &PriceEstimate) -> bool {
        match (self.has_marketplace_data, existing.has_marketplace_data) {
            (false, true) => false,
            (true, false) => true,
            _ => self.cached_at >= existing.cached_at,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    #[serde(flatten)]
    pub estimate: PriceEstimate,
    pub cached: bool,
    #[serde(rename = "totalListingsFound")]
    pub total_listings_found: Option<usize>,
    pub scraping_in_background: bool,
}

impl TriggerResponse {
    pub fn new(estimate: PriceEstimate, cached: bool) -> Self {
        let total_listings_found = estimate
            .has_marketplace_data
            .then_some(estimate.listings.len());
        let scraping_in_background = estimate.scraping_in_background;
        Self {
            estimate,
            cached,
            total_listings_found,
            scraping_in_background,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.scraping_in_background && !self.estimate.has_marketplace_data
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Body of the 404 returned by the status endpoint before any estimate exists.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusNotFound {
    pub error: String,
    pub scraping_in_background: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub image_urls: Vec<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquipmentAttributes {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub specifications: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::enum_variant_names)]
pub enum MarketplaceId {
    #[default]
    EbayUs,
    EbayUk,
    EbayDe,
}

impl MarketplaceId {
    pub fn ebay_code(&self) -> &'static str {
        match self {
            MarketplaceId::EbayUs => "EBAY_US",
            MarketplaceId::EbayUk => "EBAY_GB",
            MarketplaceId::EbayDe => "EBAY_DE",
        }
    }

    pub fn currency(&self) -> &'static str {
        match self {
            MarketplaceId::EbayUs => "USD",
            MarketplaceId::EbayUk => "GBP",
            MarketplaceId::EbayDe => "EUR",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "EBAY_US" => Some(MarketplaceId::EbayUs),
            "EBAY_GB" | "EBAY_UK" => Some(MarketplaceId::EbayUk),
            "EBAY_DE" => Some(MarketplaceId::EbayDe),
            _ => None,
        }
    }
}
