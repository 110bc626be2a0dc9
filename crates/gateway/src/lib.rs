//! HTTP gateway for Concierge.
//!
//! Routes:
//! - `GET  /health`          liveness, no auth
//! - `POST /v1/chat/stream`  one conversational turn as an SSE stream
//! - `GET  /v1/usage`        this month's usage ledger snapshot
//!
//! Built on Axum.

pub mod api;
pub mod auth;
pub mod error;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use axum::response::Json;
use axum::routing::{get, post};
use axum::{Router, extract::State};
use concierge_agent::ToolLoopEngine;
use concierge_config::{AppConfig, StoreBackend};
use concierge_core::identity::IdentityResolver;
use concierge_core::persistence::PersistenceGateway;
use concierge_core::usage::UsageRecorder;
use concierge_providers::AnthropicProvider;
use concierge_telemetry::{UsageLedger, UsageSnapshot};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use api::{ChatRequest, stream_turn};
pub use auth::StaticTokenResolver;
pub use error::{GateError, StartupError};

/// Everything a request needs, shared across handlers.
pub struct GatewayState {
    pub config: AppConfig,
    pub engine: Arc<ToolLoopEngine>,
    pub usage: Arc<dyn UsageRecorder>,
    pub store: Arc<dyn PersistenceGateway>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Concrete ledger for reporting, when the recorder is one
    pub ledger: Option<Arc<UsageLedger>>,
}

impl GatewayState {
    pub fn new(
        config: AppConfig,
        engine: Arc<ToolLoopEngine>,
        usage: Arc<dyn UsageRecorder>,
        store: Arc<dyn PersistenceGateway>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            config,
            engine,
            usage,
            store,
            identity,
            ledger: None,
        }
    }

    /// Serve `GET /v1/usage` from this ledger.
    pub fn with_ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Assemble provider, ledger, store, tools and engine from configuration.
    pub async fn from_config(config: AppConfig) -> Result<Self, StartupError> {
        let provider = Arc::new(AnthropicProvider::from_config(&config)?);
        let ledger = Arc::new(UsageLedger::from_config(&config));
        let usage: Arc<dyn UsageRecorder> = ledger.clone();
        let tools = Arc::new(concierge_tools::registry_from_config(&config)?);
        let store = open_store(&config).await?;
        let identity = StaticTokenResolver::from_config(&config.gateway.tokens);
        if identity.is_empty() {
            warn!("No API tokens configured, every chat request will be rejected");
        }

        info!(
            tools = tools.len(),
            store = ?config.store.backend,
            tokens = identity.len(),
            "Gateway subsystems ready"
        );

        let engine = Arc::new(ToolLoopEngine::new(provider, tools, usage.clone(), &config));
        Ok(Self::new(config, engine, usage, store, Arc::new(identity)).with_ledger(ledger))
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn PersistenceGateway>, StartupError> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(concierge_store::InMemoryStore::new())),
        StoreBackend::Sqlite => {
            let path = config.store.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = concierge_store::SqliteStore::new(&path.to_string_lossy()).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Build the router with tracing, CORS and the body limit applied.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let limit = state.config.gateway.max_request_bytes;
    let cors = cors_layer(&state.config.gateway.allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/stream", post(api::chat_stream_handler))
        .route("/v1/usage", get(usage_handler))
        .layer(DefaultBodyLimit::max(limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Bind and serve until the process is stopped.
pub async fn start(config: AppConfig) -> Result<(), StartupError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(config).await?);
    let app = build_router(state);

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    tools: usize,
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tools: state.engine.tools().len(),
    })
}

async fn usage_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<UsageSnapshot>, GateError> {
    state
        .identity
        .resolve(auth::bearer_token(&headers))
        .await
        .ok_or(GateError::Unauthorized)?;

    let ledger = state
        .ledger
        .as_ref()
        .ok_or_else(|| GateError::Unavailable("usage reporting is not enabled".into()))?;
    ledger.snapshot().map(Json).map_err(|e| {
        warn!(error = %e, "Could not read usage ledger");
        GateError::Unavailable(e.to_string())
    })
}
