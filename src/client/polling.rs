//! Polling state machine for background price discovery.
//!
//! One [`PollingController`] backs one form. Each `request_price` opens a session identified by
//! a generation token. Starting a session or cancelling bumps the generation under the lock
//! that guards the view, so a timer tick or network response belonging to an older session
//! can never mutate what the form shows.

use super::{ClientError, PriceApi, StatusReply};
use crate::config::PollConfig;
use crate::models::{PriceEstimate, PriceKey};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

pub const STILL_PROCESSING: &str =
    "Still processing: marketplace search continues in the background, try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    /// Trigger sent, response not yet merged.
    Requesting,
    Polling,
    Resolved,
    TimedOut,
    Superseded,
    Cancelled,
    Failed,
}

impl PollPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollPhase::Resolved
                | PollPhase::TimedOut
                | PollPhase::Superseded
                | PollPhase::Cancelled
                | PollPhase::Failed
        )
    }

    fn is_active(&self) -> bool {
        matches!(self, PollPhase::Requesting | PollPhase::Polling)
    }
}

/// What the form renders.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceView {
    pub key: Option<PriceKey>,
    /// Best estimate obtained so far; kept through timeouts and failures.
    pub estimate: Option<PriceEstimate>,
    pub phase: PollPhase,
    pub poll_count: u32,
    pub max_polls: u32,
    pub notice: Option<String>,
    /// Bumped on every mutation.
    pub revision: u64,
}

impl PriceView {
    fn idle(max_polls: u32) -> Self {
        Self {
            key: None,
            estimate: None,
            phase: PollPhase::Idle,
            poll_count: 0,
            max_polls,
            notice: None,
            revision: 0,
        }
    }
}

struct Shared {
    generation: u64,
    session: Option<JoinHandle<()>>,
    view: watch::Sender<PriceView>,
}

impl Shared {
    fn mutate<R>(&self, update: impl FnOnce(&mut PriceView) -> R) -> R {
        let mut next = self.view.borrow().clone();
        let result = update(&mut next);
        next.revision += 1;
        self.view.send_replace(next);
        result
    }

    fn update_if_current<R>(
        &self,
        token: u64,
        update: impl FnOnce(&mut PriceView) -> R,
    ) -> Option<R> {
        (self.generation == token).then(|| self.mutate(update))
    }

    /// Invalidates the active session and stops its timer. Returns whether one was active.
    fn retire(&mut self, phase: PollPhase) -> bool {
        self.generation += 1;
        if let Some(handle) = self.session.take() {
            handle.abort();
        }
        let active = self.view.borrow().phase.is_active();
        if active {
            self.mutate(|view| view.phase = phase);
        }
        active
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct PollingController<A> {
    api: Arc<A>,
    config: PollConfig,
    shared: Arc<Mutex<Shared>>,
}

impl<A: PriceApi> PollingController<A> {
    pub fn new(api: Arc<A>, config: PollConfig) -> Self {
        let (view, _) = watch::channel(PriceView::idle(config.max_polls));
        Self {
            api,
            config,
            shared: Arc::new(Mutex::new(Shared {
                generation: 0,
                session: None,
                view,
            })),
        }
    }

    /// Supersedes any running session, triggers the price request and, when the server is still
    /// scraping, starts polling. Returns the phase this session reached once the trigger
    /// response was handled (`Superseded` if a newer request overtook it).
    pub async fn request_price(&self, key: PriceKey) -> PollPhase {
        let token = self.begin_session(&key);
        let response = self.api.trigger(&key).await;

        let mut shared = lock(&self.shared);
        if shared.generation != token {
            debug!(target = "pricectx.poll", key = %key, "discarding trigger response of superseded session");
            return PollPhase::Superseded;
        }
        match response {
            Err(err) => {
                warn!(target = "pricectx.poll", key = %key, error = %err, "price trigger failed");
                shared.mutate(|view| {
                    view.phase = PollPhase::Failed;
                    view.notice = Some(format!("Price request failed: {err}"));
                });
                PollPhase::Failed
            }
            Ok(response) if response.is_pending() => {
                let estimate = response.estimate;
                shared.mutate(|view| {
                    if estimate.has_prices() || view.estimate.is_none() {
                        view.estimate = Some(estimate);
                    }
                    view.phase = PollPhase::Polling;
                });
                let session = tokio::spawn(run_session(
                    self.api.clone(),
                    self.shared.clone(),
                    key.clone(),
                    token,
                    self.config,
                ));
                shared.session = Some(session);
                info!(
                    target = "pricectx.poll",
                    key = %key,
                    interval_secs = self.config.interval.as_secs(),
                    max_polls = self.config.max_polls,
                    "polling for marketplace data"
                );
                PollPhase::Polling
            }
            Ok(response) => {
                shared.mutate(|view| {
                    view.estimate = Some(response.estimate);
                    view.phase = PollPhase::Resolved;
                });
                info!(target = "pricectx.poll", key = %key, cached = response.cached, "price resolved on trigger");
                PollPhase::Resolved
            }
        }
    }

    fn begin_session(&self, key: &PriceKey) -> u64 {
        let mut shared = lock(&self.shared);
        if shared.retire(PollPhase::Superseded) {
            info!(target = "pricectx.poll", key = %key, "previous price session superseded");
        }
        let max_polls = self.config.max_polls;
        shared.mutate(|view| {
            if view.key.as_ref() != Some(key) {
                view.estimate = None;
            }
            view.key = Some(key.clone());
            view.phase = PollPhase::Requesting;
            view.poll_count = 0;
            view.max_polls = max_polls;
            view.notice = None;
        });
        shared.generation
    }
}

impl<A> PollingController<A> {
    /// Stops the active session before returning; nothing it started mutates the view afterwards.
    pub fn cancel(&self) {
        let mut shared = lock(&self.shared);
        if shared.retire(PollPhase::Cancelled) {
            info!(target = "pricectx.poll", "price session cancelled");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PriceView> {
        lock(&self.shared).view.subscribe()
    }

    pub fn view(&self) -> PriceView {
        lock(&self.shared).view.borrow().clone()
    }
}

impl<A> Drop for PollingController<A> {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_session<A: PriceApi>(
    api: Arc<A>,
    shared: Arc<Mutex<Shared>>,
    key: PriceKey,
    token: u64,
    config: PollConfig,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let issued = lock(&shared).update_if_current(token, |view| {
            view.poll_count += 1;
            view.poll_count
        });
        let Some(poll) = issued else {
            return;
        };

        let reply = api.status(&key).await;

        let mut guard = lock(&shared);
        let Some(phase) =
            guard.update_if_current(token, |view| apply_reply(view, reply, config.max_polls))
        else {
            debug!(target = "pricectx.poll", key = %key, poll, "stale status response discarded");
            return;
        };
        if phase.is_terminal() {
            guard.session = None;
            drop(guard);
            info!(target = "pricectx.poll", key = %key, polls = poll, phase = ?phase, "polling finished");
            return;
        }
    }
}

fn apply_reply(
    view: &mut PriceView,
    reply: Result<StatusReply, ClientError>,
    max_polls: u32,
) -> PollPhase {
    match reply {
        Ok(StatusReply::Ready(estimate)) if estimate.is_terminal() => {
            view.estimate = Some(estimate);
            view.phase = PollPhase::Resolved;
            return view.phase;
        }
        Ok(StatusReply::Ready(estimate)) => {
            if !view.estimate.as_ref().is_some_and(PriceEstimate::has_prices) {
                view.estimate = Some(estimate);
            }
        }
        Ok(StatusReply::NotFound { .. }) => {}
        Err(err) => {
            warn!(target = "pricectx.poll", poll = view.poll_count, error = %err, "status poll failed; will retry");
        }
    }
    if view.poll_count >= max_polls {
        view.phase = PollPhase::TimedOut;
        view.notice = Some(STILL_PROCESSING.to_string());
    }
    view.phase
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::{Behaviour, CountingScraper};
    use crate::models::{
        ConditionPrices, ListingCondition, MarketListing, TriggerResponse,
    };
    use crate::service::tests::service_with;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Answers `not_found_polls` status calls with 404, then with marketplace data.
    struct ScriptedApi {
        not_found_polls: u32,
        status_delay: Duration,
        trigger_delays: Mutex<VecDeque<Duration>>,
        status_calls: AtomicU32,
        status_keys: Mutex<Vec<PriceKey>>,
    }

    impl ScriptedApi {
        fn new(not_found_polls: u32) -> Self {
            Self {
                not_found_polls,
                status_delay: Duration::ZERO,
                trigger_delays: Mutex::new(VecDeque::new()),
                status_calls: AtomicU32::new(0),
                status_keys: Mutex::new(Vec::new()),
            }
        }

        fn never_ready() -> Self {
            Self::new(u32::MAX)
        }

        fn calls(&self) -> u32 {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    fn ai_estimate() -> PriceEstimate {
        PriceEstimate::ai_only(
            ConditionPrices::range(300_000.0, 420_000.0),
            ConditionPrices::range(200_000.0, 280_000.0),
            ConditionPrices::range(120_000.0, 210_000.0),
            "ai-estimate",
            "AI estimate",
        )
    }

    fn marketplace_estimate(key: &PriceKey) -> PriceEstimate {
        PriceEstimate::from_listings(
            vec![MarketListing {
                url: format!("https://market.example/{}", key.model()),
                price: 185_000.0,
                source: "ebay".into(),
                condition: ListingCondition::Used,
                title: None,
            }],
            "ebay",
        )
    }

    #[async_trait]
    impl PriceApi for ScriptedApi {
        async fn trigger(&self, _key: &PriceKey) -> Result<TriggerResponse, ClientError> {
            let delay = self
                .trigger_delays
                .lock()
                .expect("delays")
                .pop_front()
                .unwrap_or_default();
            tokio::time::sleep(delay).await;
            Ok(TriggerResponse::new(ai_estimate().with_background(true), false))
        }

        async fn status(&self, key: &PriceKey) -> Result<StatusReply, ClientError> {
            let call = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.status_keys.lock().expect("keys").push(key.clone());
            tokio::time::sleep(self.status_delay).await;
            if call <= self.not_found_polls {
                Ok(StatusReply::NotFound { computing: true })
            } else {
                Ok(StatusReply::Ready(marketplace_estimate(key)))
            }
        }
    }

    fn thermo() -> PriceKey {
        PriceKey::new("Thermo Fisher", "TSQ Altis", "Mass Spectrometer")
    }

    fn agilent() -> PriceKey {
        PriceKey::new("Agilent", "1290 Infinity II", "HPLC")
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_on_first_marketplace_response() {
        let api = Arc::new(ScriptedApi::new(3));
        let controller = PollingController::new(api.clone(), PollConfig::default());

        assert_eq!(controller.request_price(thermo()).await, PollPhase::Polling);
        let view = controller.view();
        assert!(!view.estimate.as_ref().expect("ai").has_marketplace_data);

        tokio::time::sleep(Duration::from_secs(16)).await;
        let view = controller.view();
        assert_eq!(view.phase, PollPhase::Polling);
        assert_eq!(view.poll_count, 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let view = controller.view();
        assert_eq!(view.phase, PollPhase::Resolved);
        assert_eq!(view.poll_count, 4);
        let estimate = view.estimate.expect("merged");
        assert!(estimate.has_marketplace_data);
        assert!(!estimate.listings.is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.calls(), 4);
        assert_eq!(controller.view().revision, view.revision);
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_supersedes_running_session() {
        let api = Arc::new(ScriptedApi::never_ready());
        let controller = PollingController::new(api.clone(), PollConfig::default());
        let mut updates = controller.subscribe();

        controller.request_price(thermo()).await;
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(api.calls(), 1);

        controller.request_price(agilent()).await;
        tokio::time::sleep(Duration::from_secs(29)).await;

        let keys = api.status_keys.lock().expect("keys").clone();
        assert_eq!(keys.iter().filter(|key| **key == thermo()).count(), 1);
        assert!(keys.len() > 1);
        let view = controller.view();
        assert_eq!(view.key, Some(agilent()));
        assert_eq!(view.phase, PollPhase::Polling);
        assert_eq!(view.poll_count as usize, keys.len() - 1);
        assert!(updates.has_changed().expect("sender alive"));
        assert_eq!(updates.borrow_and_update().key, Some(agilent()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_poll_freezes_the_view() {
        let mut api = ScriptedApi::never_ready();
        api.status_delay = Duration::from_secs(2);
        let api = Arc::new(api);
        let controller = PollingController::new(api.clone(), PollConfig::default());

        controller.request_price(thermo()).await;
        // Third poll goes out at 15s and is still in flight at 16s.
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(controller.view().poll_count, 3);

        controller.cancel();
        let frozen = controller.view();
        assert_eq!(frozen.phase, PollPhase::Cancelled);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(controller.view(), frozen);
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_terminates_at_max_polls() {
        let api = Arc::new(ScriptedApi::never_ready());
        let config = PollConfig {
            interval: Duration::from_secs(5),
            max_polls: 4,
        };
        let controller = PollingController::new(api.clone(), config);

        controller.request_price(thermo()).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let view = controller.view();
        assert_eq!(view.phase, PollPhase::TimedOut);
        assert_eq!(view.poll_count, 4);
        assert_eq!(view.notice.as_deref(), Some(STILL_PROCESSING));
        assert!(view.estimate.expect("ai kept").has_prices());
        assert_eq!(api.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_trigger_response_is_discarded() {
        let api = ScriptedApi::never_ready();
        api.trigger_delays
            .lock()
            .expect("delays")
            .extend([Duration::from_secs(10), Duration::ZERO]);
        let controller = Arc::new(PollingController::new(Arc::new(api), PollConfig::default()));

        let slow = tokio::spawn({
            let controller = controller.clone();
            async move { controller.request_price(thermo()).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(controller.request_price(agilent()).await, PollPhase::Polling);
        assert_eq!(slow.await.expect("join"), PollPhase::Superseded);

        let view = controller.view();
        assert_eq!(view.key, Some(agilent()));
        assert_eq!(view.phase, PollPhase::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_controller_stops_polling() {
        let api = Arc::new(ScriptedApi::never_ready());
        let controller = PollingController::new(api.clone(), PollConfig::default());
        controller.request_price(thermo()).await;
        drop(controller);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_process_service_resolves_after_background_scrape() {
        let scraper = Arc::new(CountingScraper::new(
            Duration::from_secs(17),
            Behaviour::Listings,
        ));
        let (service, _cache) = service_with(scraper.clone());
        let service = Arc::new(service);

        let first = PollingController::new(service.clone(), PollConfig::default());
        let second = PollingController::new(service.clone(), PollConfig::default());
        assert_eq!(first.request_price(thermo()).await, PollPhase::Polling);
        assert_eq!(second.request_price(thermo()).await, PollPhase::Polling);

        tokio::time::sleep(Duration::from_secs(21)).await;
        for controller in [&first, &second] {
            let view = controller.view();
            assert_eq!(view.phase, PollPhase::Resolved);
            assert_eq!(view.poll_count, 4);
            assert!(view.estimate.expect("merged").has_marketplace_data);
        }
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);

        let third = PollingController::new(service, PollConfig::default());
        assert_eq!(third.request_price(thermo()).await, PollPhase::Resolved);
        assert_eq!(third.view().poll_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_trigger_fails_without_polling() {
        let scraper = Arc::new(CountingScraper::new(Duration::ZERO, Behaviour::Listings));
        let (service, _cache) = service_with(scraper);
        let controller = PollingController::new(Arc::new(service), PollConfig::default());

        let phase = controller
            .request_price(PriceKey::new("", "TSQ Altis", ""))
            .await;
        assert_eq!(phase, PollPhase::Failed);
        assert!(controller.view().notice.is_some());
    }
}
