use std::{env, str::FromStr, time::Duration};

/// Client-side polling cadence. The server derives its job deadline from the same numbers so a
/// job never outlives the pollers waiting on it by much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 24,
        }
    }
}

impl PollConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_parse::<u64>("PRICE_POLL_INTERVAL_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            max_polls: env_parse::<u32>("PRICE_POLL_MAX")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_polls),
        }
    }

    /// Upper bound on how long a client keeps polling.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_polls
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub body_limit: usize,
    pub redis_url: Option<String>,
    pub poll: PollConfig,
    pub job_deadline: Duration,
    pub job_retention: Duration,
    pub demo_scrape_delay: Duration,
    pub ebay_network_enabled: bool,
    pub metrics_key: Option<String>,
    pub openapi_key: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let poll = PollConfig::from_env();
        Self {
            port: env_parse("PORT").unwrap_or(8000),
            body_limit: env_parse::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(256 * 1024),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            poll,
            job_deadline: env_parse::<u64>("PRICE_JOB_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or_else(|| poll.budget()),
            job_retention: Duration::from_secs(3600),
            demo_scrape_delay: Duration::from_secs(
                env_parse("DEMO_SCRAPE_DELAY_SECS").unwrap_or(20),
            ),
            ebay_network_enabled: parse_env_bool("EBAY_ENABLE_NETWORK"),
            metrics_key: env::var("METRICS_KEY").ok(),
            openapi_key: env::var("OPENAPI_KEY").ok(),
        }
    }
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

pub fn parse_env_bool(key: &str) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
