use super::{ClientError, PriceApi, StatusReply};
use crate::http::build_client;
use crate::models::{PriceEstimate, PriceKey, PriceRequest, StatusNotFound, TriggerResponse};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

/// Talks to a running price-context server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPriceApi {
    base_url: String,
    http: Client,
}

impl HttpPriceApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: build_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl PriceApi for HttpPriceApi {
    async fn trigger(&self, key: &PriceKey) -> Result<TriggerResponse, ClientError> {
        let body = PriceRequest::new(key.brand(), key.model(), key.category());
        let response = self
            .http
            .post(self.url("/price-context/scrape"))
            .json(&body)
            .send()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|err| ClientError::Deserialize(err.to_string()))
    }

    async fn status(&self, key: &PriceKey) -> Result<StatusReply, ClientError> {
        let response = self
            .http
            .get(self.url("/price-context/status"))
            .query(&[
                ("brand", key.brand()),
                ("model", key.model()),
                ("category", key.category()),
            ])
            .send()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                let body = response.bytes().await.unwrap_or_default();
                Ok(not_found_reply(&body))
            }
            status if status.is_success() => {
                let estimate: PriceEstimate = response
                    .json()
                    .await
                    .map_err(|err| ClientError::Deserialize(err.to_string()))?;
                Ok(StatusReply::Ready(estimate))
            }
            status => Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// An unreadable 404 body counts as "nothing is computing".
fn not_found_reply(body: &[u8]) -> StatusReply {
    let computing = serde_json::from_slice::<StatusNotFound>(body)
        .is_ok_and(|body| body.scraping_in_background);
    StatusReply::NotFound { computing }
}
