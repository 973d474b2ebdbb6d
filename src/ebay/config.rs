use crate::models::MarketplaceId;
use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static APP_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_APP_ID_PRODUCTION").unwrap_or_default());

pub static APP_SECRET: Lazy<String> =
    Lazy::new(|| env::var("EBAY_CERT_ID_PRODUCTION").unwrap_or_default());

pub static MARKETPLACE: Lazy<MarketplaceId> = Lazy::new(|| {
    env::var("EBAY_MARKETPLACE")
        .ok()
        .and_then(|value| MarketplaceId::parse(&value))
        .unwrap_or_default()
});

pub static SEARCH_LIMIT: Lazy<u32> = Lazy::new(|| {
    env::var("EBAY_SEARCH_LIMIT")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| (1..=200).contains(value))
        .unwrap_or(50)
});

pub static ROOT: Lazy<String> = Lazy::new(|| {
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

pub static OAUTH_TOKEN_URL: Lazy<String> =
    Lazy::new(|| format!("{}/identity/v1/oauth2/token", *ROOT));

pub static BROWSE_SEARCH_URL: Lazy<String> =
    Lazy::new(|| format!("{}/buy/browse/v1/item_summary/search", *ROOT));

pub const BROWSE_SCOPES: &[&str] = &["https://api.ebay.com/oauth/api_scope"];
