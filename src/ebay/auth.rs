use crate::ebay::config::{APP_ID, APP_SECRET, OAUTH_TOKEN_URL};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Tokens are refreshed this long before eBay says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials in env")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client-credentials token shared by every scrape job.
pub struct AppTokenCache {
    http: Client,
    scopes: &'static [&'static str],
    current: Mutex<Option<CachedToken>>,
}

impl AppTokenCache {
    pub fn new(http: Client, scopes: &'static [&'static str]) -> Self {
        Self {
            http,
            scopes,
            current: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, EbayAuthError> {
        let mut guard = self.current.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > Instant::now() + EXPIRY_MARGIN
        {
            return Ok(cached.value.clone());
        }
        let fresh = request_app_token(&self.http, self.scopes).await?;
        let value = fresh.access_token.clone();
        *guard = Some(CachedToken {
            value: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in.unwrap_or(7200)),
        });
        Ok(value)
    }
}

fn basic_auth_header() -> Result<String, EbayAuthError> {
    if APP_ID.is_empty() || APP_SECRET.is_empty() {
        return Err(EbayAuthError::MissingCredentials);
    }
    let raw = format!("{}:{}", *APP_ID, *APP_SECRET);
    Ok(format!("Basic {}", BASE64.encode(raw)))
}

async fn request_app_token(
    http: &Client,
    scopes: &[&str],
) -> Result<TokenResponse, EbayAuthError> {
    let authorization = basic_auth_header()?;
    let scope = scopes.join(" ");
    let params = [("grant_type", "client_credentials"), ("scope", scope.as_str())];
    let response = http
        .post(OAUTH_TOKEN_URL.as_str())
        .header(reqwest::header::AUTHORIZATION, authorization)
        .form(&params)
        .send()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(EbayAuthError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))
}
