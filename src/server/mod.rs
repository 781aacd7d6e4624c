//! HTTP server: REST endpoints plus the real-time chat channel.

pub mod session;
pub mod ws;

use crate::config::MuseConfig;
use crate::errors::AdmissionError;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::RateLimiter;
use crate::request::ContentRequest;
use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use session::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub config: MuseConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<SessionRegistry>,
    pub request_limiter: RateLimiter,
    pub message_limiter: RateLimiter,
}

impl AppState {
    pub fn from_config(config: MuseConfig) -> Arc<Self> {
        let orchestrator = Arc::new(Orchestrator::from_config(config.clone()));
        let registry = Arc::new(SessionRegistry::new(
            config.limits.session_capacity,
            config.limits.history_cap,
            Duration::from_secs(config.limits.grace_window_secs),
        ));
        Arc::new(Self {
            request_limiter: RateLimiter::per_minute(config.limits.requests_per_minute),
            message_limiter: RateLimiter::per_minute(config.limits.messages_per_minute),
            orchestrator,
            registry,
            config,
        })
    }

    /// Rate-limit key for a request-style call. The transport peer address
    /// is authoritative unless forwarded-header trust is explicitly on.
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.config.limits.trust_forwarded_for {
            if let Some(forwarded) = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
            {
                return forwarded.to_string();
            }
        }
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Transport peer address, when the server was started with connect info.
/// Absent under in-process test routers.
struct ClientAddr(Option<SocketAddr>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

// ── error handling ──

pub enum ApiError {
    NotFound(String),
    TooManyRequests(String),
    Internal(String),
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        ApiError::TooManyRequests(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

// ── router ──

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/campaigns", post(run_campaign))
        .route("/api/runs/{id}", get(get_run))
        .route("/ws/chat/{session_id}", get(ws::ws_chat_handler))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CampaignBody {
    brand: String,
    objective: String,
    #[serde(default)]
    campaign: Option<String>,
    #[serde(default)]
    days: Option<u32>,
    #[serde(default)]
    build: Option<bool>,
    #[serde(default)]
    include_text: Option<bool>,
    #[serde(default)]
    style_ref_present: Option<bool>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    constraints: Vec<String>,
}

impl CampaignBody {
    fn into_request(self) -> ContentRequest {
        let mut request = ContentRequest::new(self.brand, self.objective);
        request.campaign = self.campaign;
        if let Some(days) = self.days {
            request.days = days.clamp(crate::request::MIN_DAYS, crate::request::MAX_DAYS);
        }
        if let Some(build) = self.build {
            request.build = build;
        }
        if let Some(include_text) = self.include_text {
            request.include_text = include_text;
        }
        if let Some(style_ref_present) = self.style_ref_present {
            request.style_ref_present = style_ref_present;
        }
        if let Some(max_retries) = self.max_retries {
            request.max_retries = max_retries;
        }
        request.constraints = self.constraints;
        request
    }
}

async fn run_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ClientAddr(peer): ClientAddr,
    Json(body): Json<CampaignBody>,
) -> Result<impl IntoResponse, ApiError> {
    let key = state.client_key(&headers, peer);
    if !state.request_limiter.check(&key).await {
        return Err(AdmissionError::RateLimited { key }.into());
    }

    let result = state
        .orchestrator
        .run_campaign(body.into_request())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "run_id": result.run_id,
        "status": result.status,
        "plan": {
            "sequence": result.plan.sequence(),
            "mode": result.plan.mode,
        },
        "artifact": result.artifact_ref,
        "duration_ms": result.duration_ms,
    })))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state
        .orchestrator
        .store()
        .read_sealed(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match doc {
        Some(doc) => Ok(Json(doc)),
        None => Err(ApiError::NotFound(format!("run '{id}' not found"))),
    }
}

async fn health_check() -> &'static str {
    "ok"
}

/// Bind and serve until shutdown. The session sweeper runs alongside.
pub async fn serve(config: MuseConfig, port: u16) -> anyhow::Result<()> {
    let state = AppState::from_config(config);
    SessionRegistry::spawn_sweeper(state.registry.clone(), Duration::from_secs(15));
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "muse server listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ── tests ──
