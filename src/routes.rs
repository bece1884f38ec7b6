use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::error::{RelayError, StartupError};
use crate::external::AlphaVantage;
use crate::metrics::{track_latency, Metrics};
use crate::structs::StockSnapshot;

/// Shared, read-only request context.
#[derive(Clone)]
pub struct AppState {
    provider: AlphaVantage,
    metrics: Metrics,
    dashboard: Dashboard,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self, StartupError> {
        Ok(Self {
            provider: AlphaVantage::new(&config.provider)?,
            metrics: Metrics::new()?,
            dashboard: Dashboard::new(&config.dashboard),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_dashboard))
        .route("/health", get(get_health))
        .route("/stock/{symbol}", get(get_stock))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_latency,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_dashboard(State(state): State<AppState>) -> Html<String> {
    state.dashboard.page()
}

async fn get_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_stock(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<StockSnapshot>, RelayError> {
    state
        .provider
        .fetch_stock(&symbol)
        .await
        .map(Json)
        .inspect_err(|err| match err {
            RelayError::MissingApiKey => warn!(symbol = %symbol, "API key not configured"),
            _ => error!(error = %err, cause = ?err, symbol = %symbol, "failed to fetch from provider"),
        })
}

async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!(?err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
