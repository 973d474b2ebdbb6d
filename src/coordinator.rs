//! Single-flight background price discovery.
//!
//! At most one scrape job runs per [`PriceKey`]. A trigger for a key that already has a running
//! job attaches to it instead of starting another. While a job runs it is the only writer of
//! its key's cache entry, and it always terminates: failures degrade to the AI estimate and a
//! hung scrape is cut off at the job deadline.

use crate::cache::PriceCache;
use crate::estimator::PriceEstimator;
use crate::models::{PriceEstimate, PriceKey};
use crate::scraper::MarketScraper;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, oneshot},
    task::{AbortHandle, JoinHandle},
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeJobStatus {
    Running,
    Completed,
    TimedOut,
}

impl ScrapeJobStatus {
    fn label(&self) -> &'static str {
        match self {
            ScrapeJobStatus::Running => "running",
            ScrapeJobStatus::Completed => "completed",
            ScrapeJobStatus::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub key: PriceKey,
    pub started_at: DateTime<Utc>,
    /// Poll cycles a client is expected to wait for this job.
    pub attempt_budget: u32,
    pub status: ScrapeJobStatus,
}

/// Observable state of the job slot for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    TimedOut,
    NoJob,
}

#[derive(Debug, Clone)]
pub struct JobTicket {
    pub already_running: bool,
    pub job: ScrapeJob,
}

#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub deadline: Duration,
    pub attempt_budget: u32,
    pub retention: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            attempt_budget: 24,
            retention: Duration::from_secs(3600),
        }
    }
}

struct RunningJob {
    job: ScrapeJob,
    task: JoinHandle<()>,
}

struct FinishedJob {
    status: ScrapeJobStatus,
    finished_at: Instant,
}

#[derive(Default)]
struct JobTable {
    running: HashMap<PriceKey, RunningJob>,
    finished: HashMap<PriceKey, FinishedJob>,
}

impl JobTable {
    fn prune(&mut self, retention: Duration) {
        let now = Instant::now();
        self.finished
            .retain(|_, job| now.duration_since(job.finished_at) < retention);
    }
}

#[derive(Clone)]
pub struct ScrapeJobCoordinator {
    cache: Arc<dyn PriceCache>,
    scraper: Arc<dyn MarketScraper>,
    estimator: Arc<dyn PriceEstimator>,
    settings: JobSettings,
    jobs: Arc<Mutex<JobTable>>,
}

impl ScrapeJobCoordinator {
    pub fn new(
        cache: Arc<dyn PriceCache>,
        scraper: Arc<dyn MarketScraper>,
        estimator: Arc<dyn PriceEstimator>,
        settings: JobSettings,
    ) -> Self {
        Self {
            cache,
            scraper,
            estimator,
            settings,
            jobs: Arc::new(Mutex::new(JobTable::default())),
        }
    }

    /// Starts a job for `key` unless one is already running, in which case the caller attaches.
    ///
    /// A newly started job first writes the AI placeholder (flagged as scraping in background)
    /// so that the trigger response and early status polls have something to show. The job task
    /// is spawned before the slot is released, so dropping this future never strands the slot.
    pub async fn ensure_job(&self, key: &PriceKey) -> JobTicket {
        let (job, placed) = {
            let mut table = self.jobs.lock().await;
            table.prune(self.settings.retention);
            if let Some(running) = table.running.get(key) {
                debug!(target = "pricectx.jobs", key = %key, job_id = %running.job.id, "attached to running scrape job");
                crate::metrics::job_attached(&key.storage_key());
                return JobTicket {
                    already_running: true,
                    job: running.job.clone(),
                };
            }
            let job = ScrapeJob {
                id: Uuid::new_v4(),
                key: key.clone(),
                started_at: Utc::now(),
                attempt_budget: self.settings.attempt_budget,
                status: ScrapeJobStatus::Running,
            };
            let (placed_tx, placed) = oneshot::channel();
            let task = tokio::spawn({
                let coordinator = self.clone();
                let job = job.clone();
                async move {
                    coordinator.write_placeholder(&job.key).await;
                    let _ = placed_tx.send(());
                    coordinator.run(job).await
                }
            });
            table.running.insert(
                key.clone(),
                RunningJob {
                    job: job.clone(),
                    task,
                },
            );
            table.finished.remove(key);
            (job, placed)
        };

        info!(target = "pricectx.jobs", key = %key, job_id = %job.id, "scrape job started");
        crate::metrics::job_started(&key.storage_key());

        // Closed only if the job was aborted before its placeholder landed.
        let _ = placed.await;

        JobTicket {
            already_running: false,
            job,
        }
    }

    pub async fn job_status(&self, key: &PriceKey) -> JobStatus {
        let table = self.jobs.lock().await;
        if table.running.contains_key(key) {
            return JobStatus::Running;
        }
        match table.finished.get(key).map(|job| job.status) {
            Some(ScrapeJobStatus::Completed) => JobStatus::Completed,
            Some(ScrapeJobStatus::TimedOut) => JobStatus::TimedOut,
            Some(ScrapeJobStatus::Running) | None => JobStatus::NoJob,
        }
    }

    pub async fn running_jobs(&self) -> usize {
        self.jobs.lock().await.running.len()
    }

    /// Aborts every running job and settles its key on the AI estimate, so no entry is left
    /// flagged as scraping in background without a job behind it.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.jobs.lock().await.running.drain().collect();
        for (key, RunningJob { job, task }) in drained {
            task.abort();
            // Wait for the abort so a late write cannot land after the settle below.
            let _ = task.await;
            self.settle_ai_only(&key).await;
            debug!(target = "pricectx.jobs", key = %key, job_id = %job.id, "scrape job aborted on shutdown");
        }
    }

    async fn write_placeholder(&self, key: &PriceKey) {
        let placeholder = match self.cache.get(key).await {
            Some(existing) => existing.restamped(),
            None => self.estimator.estimate(key).await,
        };
        self.cache.put(key, placeholder.with_background(true)).await;
    }

    async fn run(self, job: ScrapeJob) {
        let started = Instant::now();
        // Own task: a panicking scraper surfaces as a JoinError.
        let scrape = tokio::spawn({
            let scraper = self.scraper.clone();
            let key = job.key.clone();
            async move { scraper.scrape(&key).await }
        });
        let abort_scrape = AbortOnDrop(scrape.abort_handle());

        let status = match timeout(self.settings.deadline, scrape).await {
            Ok(Ok(Ok(listings))) => {
                let estimate = PriceEstimate::from_listings(listings, self.scraper.name());
                if estimate.has_marketplace_data {
                    info!(
                        target = "pricectx.jobs",
                        key = %job.key,
                        listings = estimate.listings.len(),
                        "marketplace data found"
                    );
                    self.cache.put(&job.key, estimate).await;
                } else {
                    info!(target = "pricectx.jobs", key = %job.key, "no usable listings; keeping AI estimate");
                    self.settle_ai_only(&job.key).await;
                }
                ScrapeJobStatus::Completed
            }
            Ok(Ok(Err(err))) => {
                warn!(target = "pricectx.jobs", key = %job.key, error = %err, "scrape failed; keeping AI estimate");
                self.settle_ai_only(&job.key).await;
                ScrapeJobStatus::Completed
            }
            Ok(Err(join_err)) => {
                warn!(target = "pricectx.jobs", key = %job.key, error = %join_err, "scrape task aborted; keeping AI estimate");
                self.settle_ai_only(&job.key).await;
                ScrapeJobStatus::Completed
            }
            Err(_) => {
                abort_scrape.0.abort();
                warn!(
                    target = "pricectx.jobs",
                    key = %job.key,
                    deadline_secs = self.settings.deadline.as_secs(),
                    "scrape job timed out"
                );
                self.settle_ai_only(&job.key).await;
                ScrapeJobStatus::TimedOut
            }
        };

        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::job_finished(status.label(), elapsed_ms);
        self.finish(&job, status).await;
    }

    /// Clears the background flag on the AI estimate so pollers see a terminal entry.
    async fn settle_ai_only(&self, key: &PriceKey) {
        let estimate = match self.cache.get(key).await {
            Some(existing) => existing.restamped(),
            None => self.estimator.estimate(key).await,
        };
        self.cache.put(key, estimate.with_background(false)).await;
    }

    async fn finish(&self, job: &ScrapeJob, status: ScrapeJobStatus) {
        let mut table = self.jobs.lock().await;
        let owns_slot = table
            .running
            .get(&job.key)
            .is_some_and(|running| running.job.id == job.id);
        if !owns_slot {
            return;
        }
        table.running.remove(&job.key);
        table.finished.insert(
            job.key.clone(),
            FinishedJob {
                status,
                finished_at: Instant::now(),
            },
        );
        info!(
            target = "pricectx.jobs",
            key = %job.key,
            job_id = %job.id,
            status = status.label(),
            "scrape job finished"
        );
    }
}

/// Cancels the inner scrape task if the job task itself is aborted.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
