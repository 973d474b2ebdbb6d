use crate::cache::PriceCache;
use crate::coordinator::{JobStatus, ScrapeJobCoordinator};
use crate::error::PriceError;
use crate::models::{PriceEstimate, PriceKey, PriceRequest, TriggerResponse};
use std::sync::Arc;
use tracing::info;

/// Result of a read-only status lookup.
#[derive(Debug, Clone)]
pub enum PriceStatus {
    Found(PriceEstimate),
    /// Nothing cached yet; `computing` tells whether a job is working on it.
    NotFound { computing: bool },
}

#[derive(Clone)]
pub struct PriceRequestService {
    cache: Arc<dyn PriceCache>,
    coordinator: ScrapeJobCoordinator,
}

impl PriceRequestService {
    pub fn new(cache: Arc<dyn PriceCache>, coordinator: ScrapeJobCoordinator) -> Self {
        Self { cache, coordinator }
    }

    pub fn coordinator(&self) -> &ScrapeJobCoordinator {
        &self.coordinator
    }

    /// Returns cached marketplace data straight away, otherwise starts or joins the background
    /// job and returns the best estimate available right now. Never waits for the scrape.
    pub async fn trigger(&self, request: &PriceRequest) -> Result<TriggerResponse, PriceError> {
        let key = validated_key(request, "trigger")?;

        if let Some(cached) = self.cache.get(&key).await
            && cached.has_marketplace_data
        {
            info!(target = "pricectx.api", key = %key, "served cached marketplace estimate");
            return Ok(TriggerResponse::new(cached, true));
        }

        let ticket = self.coordinator.ensure_job(&key).await;
        let estimate = self
            .cache
            .get(&key)
            .await
            .unwrap_or_else(PriceEstimate::pending);
        info!(
            target = "pricectx.api",
            key = %key,
            job_id = %ticket.job.id,
            attached = ticket.already_running,
            scraping = estimate.scraping_in_background,
            "price trigger accepted"
        );
        Ok(TriggerResponse::new(estimate, false))
    }

    /// Read-only; never starts a job.
    pub async fn status(&self, key: &PriceKey) -> PriceStatus {
        match self.cache.get(key).await {
            Some(estimate) => PriceStatus::Found(estimate),
            None => PriceStatus::NotFound {
                computing: self.coordinator.job_status(key).await == JobStatus::Running,
            },
        }
    }

    pub async fn job_status(&self, key: &PriceKey) -> JobStatus {
        self.coordinator.job_status(key).await
    }
}

/// Brand and model are mandatory; category may be empty.
pub fn validated_key(request: &PriceRequest, stage: &'static str) -> Result<PriceKey, PriceError> {
    let key = request.key();
    if key.brand().is_empty() {
        return Err(PriceError::invalid_input(stage, "brand is required"));
    }
    if key.model().is_empty() {
        return Err(PriceError::invalid_input(stage, "model is required"));
    }
    Ok(key)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::coordinator::tests::{Behaviour, CountingScraper, coordinator_with};
    use crate::error::PriceErrorKind;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    pub(crate) fn service_with(
        scraper: Arc<CountingScraper>,
    ) -> (PriceRequestService, Arc<crate::cache::MemoryPriceCache>) {
        let (coordinator, cache) = coordinator_with(scraper);
        (PriceRequestService::new(cache.clone(), coordinator), cache)
    }

    fn request() -> PriceRequest {
        PriceRequest::new("Thermo Fisher", "TSQ Altis", "Mass Spectrometer")
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_without_cache_starts_background_scrape() {
        let scraper = Arc::new(CountingScraper::new(
            Duration::from_secs(40),
            Behaviour::Listings,
        ));
        let (service, _cache) = service_with(scraper);
        let response = service.trigger(&request()).await.expect("trigger");
        assert!(response.scraping_in_background);
        assert!(!response.cached);
        assert!(!response.estimate.has_marketplace_data);
        assert!(response.total_listings_found.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_serves_cached_marketplace_data() {
        let scraper = Arc::new(CountingScraper::new(
            Duration::from_secs(10),
            Behaviour::Listings,
        ));
        let (service, _cache) = service_with(scraper.clone());
        service.trigger(&request()).await.expect("trigger");
        tokio::time::sleep(Duration::from_secs(11)).await;

        let again = service.trigger(&request()).await.expect("trigger");
        assert!(again.cached);
        assert!(!again.scraping_in_background);
        assert_eq!(again.total_listings_found, Some(2));
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_triggers_share_one_job() {
        let scraper = Arc::new(CountingScraper::new(
            Duration::from_secs(30),
            Behaviour::Listings,
        ));
        let (service, _cache) = service_with(scraper.clone());
        let first = service.trigger(&request()).await.expect("trigger");
        let second = service
            .trigger(&PriceRequest::new("THERMO FISHER", "tsq altis", "mass spectrometer"))
            .await
            .expect("trigger");
        assert!(first.scraping_in_background && second.scraping_in_background);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);
        let key = request().key();
        match service.status(&key).await {
            PriceStatus::Found(estimate) => assert!(estimate.has_marketplace_data),
            other => panic!("expected estimate, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_never_starts_a_job() {
        let scraper = Arc::new(CountingScraper::new(Duration::ZERO, Behaviour::Listings));
        let (service, _cache) = service_with(scraper.clone());
        let key = request().key();
        for _ in 0..5 {
            match service.status(&key).await {
                PriceStatus::NotFound { computing } => assert!(!computing),
                other => panic!("expected not found, got {other:?}"),
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.job_status(&key).await, JobStatus::NoJob);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_rejects_missing_model() {
        let scraper = Arc::new(CountingScraper::new(Duration::ZERO, Behaviour::Listings));
        let (service, _cache) = service_with(scraper.clone());
        let err = service
            .trigger(&PriceRequest::new("Agilent", "   ", "HPLC"))
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), PriceErrorKind::InvalidInput);
        assert_eq!(service.coordinator().running_jobs().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completeness_never_regresses_across_triggers() {
        let scraper = Arc::new(CountingScraper::new(
            Duration::from_secs(5),
            Behaviour::Listings,
        ));
        let (service, cache) = service_with(scraper);
        service.trigger(&request()).await.expect("trigger");
        tokio::time::sleep(Duration::from_secs(6)).await;
        for _ in 0..3 {
            let response = service.trigger(&request()).await.expect("trigger");
            assert!(response.estimate.has_marketplace_data);
        }
        let stored = cache.get(&request().key()).await.expect("entry");
        assert!(stored.has_marketplace_data);
    }
}
