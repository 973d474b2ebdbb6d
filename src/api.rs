use crate::analyzer::EquipmentAnalyzer;
use crate::coordinator::JobStatus;
use crate::error::{PriceError, PriceErrorKind};
use crate::models::{
    AnalyzeRequest, ApiError, EquipmentAttributes, PriceEstimate, PriceRequest, StatusNotFound,
    TriggerResponse,
};
use crate::service::{PriceRequestService, PriceStatus, validated_key};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub service: PriceRequestService,
    pub analyzer: EquipmentAnalyzer,
    pub openapi: Arc<serde_json::Value>,
    pub prometheus_handle: Option<PrometheusHandle>,
    pub metrics_key: Option<String>,
    pub openapi_key: Option<String>,
}

impl AppState {
    pub fn new(service: PriceRequestService, analyzer: EquipmentAnalyzer) -> Self {
        Self {
            service,
            analyzer,
            openapi: Arc::new(bundled_openapi()),
            prometheus_handle: None,
            metrics_key: None,
            openapi_key: None,
        }
    }
}

pub fn bundled_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi":"3.0.3"}))
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .nest(
            "/price-context",
            Router::new()
                .route("/scrape", post(trigger_scrape))
                .route("/status", get(price_status))
                .route("/job", get(job_status)),
        )
        .route("/equipment/analyze", post(analyze_equipment))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "price-context-rs",
        "running_jobs": state.service.coordinator().running_jobs().await,
    }))
}

fn presented_key_matches(headers: &HeaderMap, header: &str, expected: &Option<String>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| presented == expected)
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if !presented_key_matches(&headers, "X-Docs-Key", &state.openapi_key) {
        return Err(AppError::Price(PriceError::invalid_input(
            "docs",
            "unauthorized",
        )));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !presented_key_matches(&headers, "X-Metrics-Key", &state.metrics_key) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    let body = state
        .prometheus_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// Request a price estimate, starting a background marketplace scrape when needed.
///
/// - Method: `POST`
/// - Path: `/price-context/scrape`
/// - Body: `{brand, model, category}`
/// - Response: `TriggerResponse`; never waits for the scrape to finish
async fn trigger_scrape(
    State(state): State<AppState>,
    Json(payload): Json<PriceRequest>,
) -> Result<Json<TriggerResponse>, AppError> {
    crate::metrics::inc_requests("/price-context/scrape");
    let response = state.service.trigger(&payload).await?;
    Ok(Json(response))
}

/// Read the cached estimate for a key. `404` while nothing is cached yet; keep polling.
///
/// - Method: `GET`
/// - Path: `/price-context/status?brand=&model=&category=`
async fn price_status(
    State(state): State<AppState>,
    Query(query): Query<PriceRequest>,
) -> Result<StatusReply, AppError> {
    crate::metrics::inc_requests("/price-context/status");
    let key = validated_key(&query, "status")?;
    Ok(match state.service.status(&key).await {
        PriceStatus::Found(estimate) => StatusReply::Found(estimate),
        PriceStatus::NotFound { computing } => StatusReply::NotFound(computing),
    })
}

enum StatusReply {
    Found(PriceEstimate),
    NotFound(bool),
}

impl IntoResponse for StatusReply {
    fn into_response(self) -> Response {
        match self {
            StatusReply::Found(estimate) => (StatusCode::OK, Json(estimate)).into_response(),
            StatusReply::NotFound(computing) => (
                StatusCode::NOT_FOUND,
                Json(StatusNotFound {
                    error: "not_found".to_string(),
                    scraping_in_background: computing,
                }),
            )
                .into_response(),
        }
    }
}

async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<PriceRequest>,
) -> Result<Json<JobStatus>, AppError> {
    crate::metrics::inc_requests("/price-context/job");
    let key = validated_key(&query, "job")?;
    Ok(Json(state.service.job_status(&key).await))
}

/// Identify equipment from photos. Outside the price pipeline.
///
/// - Method: `POST`
/// - Path: `/equipment/analyze`
/// - Body: `{image_urls: [..]}`
async fn analyze_equipment(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<EquipmentAttributes>, AppError> {
    crate::metrics::inc_requests("/equipment/analyze");
    let attributes = state.analyzer.analyze_images(&payload.image_urls).await?;
    info!(
        target = "pricectx.api",
        brand = attributes.brand.as_deref().unwrap_or("-"),
        confidence = attributes.confidence,
        "equipment analyzed"
    );
    Ok(Json(attributes))
}

#[derive(Debug)]
pub enum AppError {
    Price(PriceError),
}

impl From<PriceError> for AppError {
    fn from(value: PriceError) -> Self {
        Self::Price(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Price(err) => {
                let status = match err.kind() {
                    PriceErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PriceErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                    PriceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}
