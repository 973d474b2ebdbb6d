use tracing::trace;

// Trace-based counters; the Prometheus handle in `api` only renders the recorder.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "pricectx.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn job_started(key: &str) {
    trace!(target = "pricectx.metrics", key = key, "scrape_jobs_started_inc");
}

pub fn job_attached(key: &str) {
    trace!(target = "pricectx.metrics", key = key, "scrape_jobs_attached_inc");
}

pub fn job_finished(status: &'static str, elapsed_ms: u128) {
    trace!(
        target = "pricectx.metrics",
        status = status,
        elapsed_ms = elapsed_ms as u64,
        "scrape_job_finished"
    );
}
