//! HTTP gateway for FieldSage.
//!
//! Exposes the answer endpoint and a health check:
//!
//! - `POST /answer`: stream an answer (plain text, or SSE with `?mode=events`)
//! - `GET /health`: liveness plus the active provider and model
//!
//! Built on Axum. The answer engine is built once at startup and shared
//! immutably across requests.

pub mod api;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use fieldsage_answer::AnswerEngine;
use fieldsage_config::AppConfig;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub engine: Arc<AnswerEngine>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(engine: Arc<AnswerEngine>) -> Self {
        Self {
            engine,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - request body size limit (`gateway.body_limit_bytes`)
/// - CORS for the configured origins
/// - HTTP trace logging
pub fn build_router(state: SharedState, gateway: &fieldsage_config::GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/answer", post(api::answer_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(gateway.body_limit_bytes))
        .layer(cors_layer(&gateway.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
///
/// Builds the provider and answer engine once, then serves until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if !config.has_api_key() {
        warn!(
            provider = %config.default_provider,
            "No API key configured, provider calls will fail authentication"
        );
    }

    let router = fieldsage_providers::router::build_from_config(&config);
    let provider = router
        .default()
        .ok_or("No default provider configured")?;
    let engine = Arc::new(AnswerEngine::from_config(provider, &config));

    info!(
        provider = engine.provider_name(),
        model = engine.model(),
        schema = %config.answer.default_schema,
        "Answer engine ready"
    );

    let app = build_router(Arc::new(GatewayState::new(engine)), &config.gateway);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    model: String,
    started_at: DateTime<Utc>,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.engine.provider_name().to_string(),
        model: state.engine.model().to_string(),
        started_at: state.started_at,
    })
}
