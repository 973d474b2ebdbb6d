//! Triggers a price request against a running server and follows it to completion.
//!
//! Usage: `price-probe <brand> <model> [category]`. The server address comes from
//! `PRICE_CONTEXT_URL` (default `http://localhost:8000`).

use eyre::eyre;
use price_context::{
    client::{HttpPriceApi, PollingController, PriceView},
    config::PollConfig,
    models::PriceKey,
};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).try_init();

    let mut args = std::env::args().skip(1);
    let (Some(brand), Some(model)) = (args.next(), args.next()) else {
        return Err(eyre!("usage: price-probe <brand> <model> [category]"));
    };
    let category = args.next().unwrap_or_default();
    let key = PriceKey::new(&brand, &model, &category);

    let base_url =
        std::env::var("PRICE_CONTEXT_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let controller = PollingController::new(Arc::new(HttpPriceApi::new(&base_url)), PollConfig::from_env());
    let mut updates = controller.subscribe();

    let phase = controller.request_price(key).await;
    print_view(&updates.borrow_and_update());
    if !phase.is_terminal() {
        while updates.changed().await.is_ok() {
            let view = updates.borrow_and_update().clone();
            print_view(&view);
            if view.phase.is_terminal() {
                break;
            }
        }
    }

    let view = controller.view();
    if let Some(estimate) = &view.estimate {
        println!("{}", serde_json::to_string_pretty(estimate)?);
    }
    Ok(())
}

fn print_view(view: &PriceView) {
    let source = view
        .estimate
        .as_ref()
        .map(|estimate| estimate.source.as_str())
        .unwrap_or("-");
    println!(
        "[{:?}] polls {}/{} source={}{}",
        view.phase,
        view.poll_count,
        view.max_polls,
        source,
        view.notice
            .as_deref()
            .map(|notice| format!(" ({notice})"))
            .unwrap_or_default()
    );
}
