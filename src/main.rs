use eyre::WrapErr;
use metrics_exporter_prometheus::PrometheusBuilder;
use price_context::{
    analyzer::EquipmentAnalyzer,
    api::{AppState, router},
    cache::{MemoryPriceCache, PriceCache, RedisPriceCache},
    config::ServiceConfig,
    coordinator::{JobSettings, ScrapeJobCoordinator},
    ebay::EbayBrowseScraper,
    estimator::AiEstimator,
    llm::{LlmClient, LlmConfig},
    scraper::{DemoScraper, MarketScraper},
    service::PriceRequestService,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "pricectx.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServiceConfig::from_env();
    let llm = LlmConfig::from_env().map(|llm| Arc::new(LlmClient::new(llm)));
    if llm.is_none() {
        info!(target = "pricectx.api", "no LLM gateway configured; using heuristic estimates");
    }

    let cache = price_cache(&config);
    let scraper: Arc<dyn MarketScraper> = if config.ebay_network_enabled {
        Arc::new(EbayBrowseScraper::new())
    } else {
        Arc::new(DemoScraper::new(config.demo_scrape_delay))
    };
    info!(target = "pricectx.api", scraper = scraper.name(), "marketplace scraper selected");

    let coordinator = ScrapeJobCoordinator::new(
        cache.clone(),
        scraper,
        Arc::new(AiEstimator::new(llm.clone())),
        JobSettings {
            deadline: config.job_deadline,
            attempt_budget: config.poll.max_polls,
            retention: config.job_retention,
        },
    );
    let service = PriceRequestService::new(cache, coordinator.clone());

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;
    let state = AppState {
        prometheus_handle: Some(prometheus_handle),
        metrics_key: config.metrics_key.clone(),
        openapi_key: config.openapi_key.clone(),
        ..AppState::new(service, EquipmentAnalyzer::new(llm))
    };
    let app = router(state, config.body_limit);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "pricectx.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown().await;
    info!(target = "pricectx.api", "server stopped");
    Ok(())
}

fn price_cache(config: &ServiceConfig) -> Arc<dyn PriceCache> {
    if let Some(url) = &config.redis_url {
        match RedisPriceCache::open(url) {
            Ok(cache) => {
                info!(target = "pricectx.cache", "using redis price cache");
                return Arc::new(cache);
            }
            Err(err) => {
                warn!(target = "pricectx.cache", error = %err, "redis unavailable; falling back to in-memory cache");
            }
        }
    }
    Arc::new(MemoryPriceCache::new())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "pricectx.api", error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!(target = "pricectx.api", "shutdown requested");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
