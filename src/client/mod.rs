//! Client side of the price pipeline: the transport over the two price endpoints, the polling
//! state machine that waits for background scrapes, and the upload queue used by listing forms.

pub mod http;
pub mod polling;
pub mod storage;
pub mod upload;

use crate::models::{PriceEstimate, PriceKey, PriceRequest, TriggerResponse};
use crate::service::{PriceRequestService, PriceStatus};
use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpPriceApi;
pub use polling::{PollPhase, PollingController, PriceView};
pub use storage::SupabaseStorage;
pub use upload::{FileStorage, UploadQueueController};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// What a status poll can observe. `NotFound` is not an error: nothing is cached yet.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReply {
    Ready(PriceEstimate),
    NotFound { computing: bool },
}

#[async_trait]
pub trait PriceApi: Send + Sync + 'static {
    async fn trigger(&self, key: &PriceKey) -> Result<TriggerResponse, ClientError>;
    async fn status(&self, key: &PriceKey) -> Result<StatusReply, ClientError>;
}

/// In-process transport, used by tests and by embedders that host the service themselves.
#[async_trait]
impl PriceApi for PriceRequestService {
    async fn trigger(&self, key: &PriceKey) -> Result<TriggerResponse, ClientError> {
        let request = PriceRequest::new(key.brand(), key.model(), key.category());
        PriceRequestService::trigger(self, &request)
            .await
            .map_err(|err| ClientError::Rejected(err.to_string()))
    }

    async fn status(&self, key: &PriceKey) -> Result<StatusReply, ClientError> {
        Ok(match PriceRequestService::status(self, key).await {
            PriceStatus::Found(estimate) => StatusReply::Ready(estimate),
            PriceStatus::NotFound { computing } => StatusReply::NotFound { computing },
        })
    }
}
