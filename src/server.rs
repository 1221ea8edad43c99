//! HTTP API server.
//!
//! A thin axum surface over the chat pipeline, the conversation log,
//! assessment, and retrieval. Every `/api` route passes through the rate
//! limiter; `/health` does not.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/chat` | One chat turn, answered as `text/event-stream` |
//! | `GET`  | `/api/conversation/{guid}` | Conversation metadata and messages |
//! | `POST` | `/api/conversation/{guid}` | Create or update a conversation, optionally importing messages |
//! | `GET`  | `/api/messages/{guid}` | Messages of a conversation (created if missing) |
//! | `POST` | `/api/assessment` | Ranked AI opportunities and service recommendations |
//! | `POST` | `/api/recommendations` | Service recommendations only |
//! | `POST` | `/api/retrieval/search` | Knowledge-base search |
//! | `GET`  | `/api/retrieval/health` | Retrieval health probe and cache sizes |
//! | `GET`  | `/api/security/alerts` | Recent security alerts and event counts (API secret required) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "validation failed: content: Content cannot be empty",
//!              "issues": [{ "path": "content", "message": "Content cannot be empty" }] } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `generation_failed` (502), `upstream` (502), `internal` (500). A
//! rate-limited `/api` request is answered by the limiter middleware with
//! its own 429 body (see [`crate::ratelimit`]).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for the browser chat
//! client.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use advisory_core::models::BusinessProfile;
use advisory_core::store::memory::InMemoryStateStore;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::assessment::Assessor;
use crate::chat::ChatService;
use crate::config::Config;
use crate::conversation_store::{ConversationLog, SqliteConversationLog};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::AdvisorError;
use crate::llm::{self, ChatProvider};
use crate::migrate;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::{client_ip, identify, rate_limit_middleware, RateLimiter};
use crate::retrieval::{CachedRetrieval, SearchProfile};
use crate::security::{SecurityEvent, SecurityEventKind, SecurityMonitor, Severity};
use crate::validation::{validate_chat_message, validate_conversation, validate_guid};
use crate::vector::{self, VectorIndex};

/// External services the server talks to.
///
/// [`Services::from_config`] builds the configured providers; tests pass
/// their own implementations to [`run_server_with_services`].
#[derive(Clone)]
pub struct Services {
    pub chat: Arc<dyn ChatProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
}

impl Services {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            chat: llm::create_provider(&config.llm)?,
            embedder: embedding::create_provider(&config.embedding)?,
            index: vector::create_index(&config.vector)?,
        })
    }
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    chat: Arc<ChatService>,
    log: Arc<dyn ConversationLog>,
    retrieval: Arc<CachedRetrieval>,
    assessor: Arc<Assessor>,
    security: Arc<SecurityMonitor>,
    api_secret: Option<String>,
}

/// Starts the HTTP server with the providers named in the configuration.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    run_server_with_services(config, services).await
}

/// Starts the HTTP server with caller-supplied providers.
pub async fn run_server_with_services(config: &Config, services: Services) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    migrate::create_tables(&pool).await?;

    let security = Arc::new(SecurityMonitor::new());
    let log: Arc<dyn ConversationLog> = Arc::new(SqliteConversationLog::new(pool.clone()));

    let retrieval = Arc::new(CachedRetrieval::new(
        services.embedder.clone(),
        services.index.clone(),
        services.chat.clone(),
        &config.llm.expansion_model,
        &config.retrieval,
    ));
    retrieval.spawn_sweeper();

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        services.chat.clone(),
        Arc::new(InMemoryStateStore::new()),
    ));
    let chat = Arc::new(ChatService::new(
        config,
        orchestrator,
        retrieval.clone(),
        log.clone(),
    ));

    let api_secret = config.server.api_secret();
    if api_secret.is_none() {
        warn!(
            env = %config.server.api_secret_env,
            "no API secret configured, every caller is treated as anonymous"
        );
    }

    let limiter = Arc::new(
        RateLimiter::from_config(&config.rate_limit, Some(pool))?
            .with_security(security.clone())
            .with_api_secret(api_secret.clone()),
    );
    spawn_sweeper(
        limiter.clone(),
        security.clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_secs),
    );

    let state = AppState {
        chat,
        log,
        retrieval,
        assessor: Arc::new(Assessor::new(
            services.chat.clone(),
            &config.llm.rationale_model,
        )),
        security,
        api_secret,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .route(
            "/api/conversation/{guid}",
            get(handle_get_conversation).post(handle_save_conversation),
        )
        .route("/api/messages/{guid}", get(handle_messages))
        .route("/api/assessment", post(handle_assessment))
        .route("/api/recommendations", post(handle_recommendations))
        .route("/api/retrieval/search", post(handle_search))
        .route("/api/retrieval/health", get(handle_retrieval_health))
        .route("/api/security/alerts", get(handle_security_alerts))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(cors)
        .with_state(state);

    println!("Advisor server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Expire rate-limit windows and old security events every `every`.
fn spawn_sweeper(limiter: Arc<RateLimiter>, security: Arc<SecurityMonitor>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = limiter.sweep().await {
                warn!(error = %e, "rate limit sweep failed");
            }
            let removed = security.cleanup(chrono::Utc::now());
            if removed > 0 {
                debug!(removed, "swept idle security event keys");
            }
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<Value>,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    issues: Option<Value>,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            issues: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                issues: self.issues,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<AdvisorError> for AppError {
    fn from(err: AdvisorError) -> Self {
        let message = err.to_string();
        match err {
            AdvisorError::Validation(issues) => AppError {
                issues: serde_json::to_value(&issues).ok(),
                ..bad_request(message)
            },
            AdvisorError::NotFound(_) => not_found(message),
            AdvisorError::GenerationFailed(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "generation_failed", message)
            }
            AdvisorError::Upstream(_) => AppError::new(StatusCode::BAD_GATEWAY, "upstream", message),
            AdvisorError::Unauthorized(_) => {
                AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
            }
            AdvisorError::Config(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AdvisorError>() {
            Ok(advisor) => advisor.into(),
            Err(other) => {
                error!(error = %format!("{:#}", other), "request failed");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error",
                )
            }
        }
    }
}

impl AppState {
    /// Turn a validation failure into a 400 and record it as a security event.
    fn reject(&self, headers: &HeaderMap, endpoint: &str, err: AdvisorError) -> AppError {
        if let AdvisorError::Validation(issues) = &err {
            let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
            self.security.record(
                SecurityEvent::new(SecurityEventKind::ValidationFail, Severity::Warn)
                    .ip(client_ip(headers))
                    .endpoint(endpoint)
                    .detail("paths", paths.join(",")),
            );
        }
        err.into()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

/// Validate the turn, then answer as server-sent events. The conversation
/// guid (new or echoed) is returned in `X-Conversation-Guid`.
async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let message =
        validate_chat_message(&body).map_err(|e| state.reject(&headers, "/api/chat", e))?;

    let turn = state.chat.prepare(&message).await?;
    let guid = turn.guid.clone();
    info!(guid = %guid, stage = %turn.stage, "chat turn accepted");

    let frames = state.chat.stream_turn(turn).map(Ok::<_, Infallible>);

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Conversation-Guid", guid)
        .body(Body::from_stream(frames))
        .map_err(|e| anyhow::Error::from(e).into())
}

// ============ /api/conversation/{guid} ============

async fn handle_get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(guid): Path<String>,
) -> Result<Json<Value>, AppError> {
    validate_guid(&guid).map_err(|e| state.reject(&headers, "/api/conversation", e))?;

    let conversation = state
        .log
        .conversation(&guid)
        .await?
        .ok_or_else(|| not_found(format!("Conversation not found: {}", guid)))?;
    let messages = state.log.messages(&guid).await?;

    Ok(Json(serde_json::json!({
        "conversation": conversation,
        "messages": messages,
    })))
}

async fn handle_save_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(guid): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    validate_guid(&guid).map_err(|e| state.reject(&headers, "/api/conversation", e))?;
    let payload =
        validate_conversation(&body).map_err(|e| state.reject(&headers, "/api/conversation", e))?;

    let conversation = state
        .log
        .save_conversation(
            &guid,
            payload.title.as_deref(),
            payload.description.as_deref(),
        )
        .await?;
    for turn in &payload.messages {
        state.log.append(&guid, turn.role, &turn.content).await?;
    }
    let messages = state.log.messages(&guid).await?;

    Ok(Json(serde_json::json!({
        "conversation": conversation,
        "messages": messages,
    })))
}

// ============ GET /api/messages/{guid} ============

async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(guid): Path<String>,
) -> Result<Json<Value>, AppError> {
    validate_guid(&guid).map_err(|e| state.reject(&headers, "/api/messages", e))?;

    state.log.ensure_conversation(&guid).await?;
    let messages = state.log.messages(&guid).await?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

// ============ Assessment ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentRequest {
    profile: BusinessProfile,
    #[serde(default = "default_true")]
    include_rationale: bool,
}

fn default_true() -> bool {
    true
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, AdvisorError> {
    serde_json::from_value(body).map_err(|e| AdvisorError::validation("profile", e.to_string()))
}

async fn handle_assessment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let request: AssessmentRequest =
        parse_body(body).map_err(|e| state.reject(&headers, "/api/assessment", e))?;

    let report = state
        .assessor
        .assess(&request.profile, request.include_rationale)
        .await;
    Ok(Json(serde_json::to_value(report).map_err(anyhow::Error::from)?))
}

#[derive(Deserialize)]
struct RecommendationRequest {
    profile: BusinessProfile,
}

async fn handle_recommendations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let request: RecommendationRequest =
        parse_body(body).map_err(|e| state.reject(&headers, "/api/recommendations", e))?;

    let recommendations = state.assessor.recommend(&request.profile);
    Ok(Json(serde_json::json!({ "recommendations": recommendations })))
}

// ============ Retrieval ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    industry: String,
    query: String,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Value>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let profile: SearchProfile = match req.profile.as_deref() {
        Some(p) => p.parse().map_err(|e: anyhow::Error| bad_request(e.to_string()))?,
        None => SearchProfile::Default,
    };
    let mut options = state.retrieval.options_for(profile);
    if let Some(top_k) = req.top_k {
        options.top_k = top_k.clamp(1, 50);
    }

    let results = state
        .retrieval
        .get_relevant_docs(&req.industry, req.query.trim(), &options)
        .await;
    Ok(Json(serde_json::json!({ "results": results })))
}

async fn handle_retrieval_health(State(state): State<AppState>) -> Json<Value> {
    let report = state.retrieval.health_check().await;
    Json(serde_json::json!({
        "health": report,
        "cache": state.retrieval.cache_stats(),
    }))
}

// ============ GET /api/security/alerts ============

#[derive(Deserialize)]
struct AlertsQuery {
    #[serde(default = "default_alert_hours")]
    hours: i64,
}

fn default_alert_hours() -> i64 {
    24
}

/// Only callers holding the API secret may read alerts; they name IPs and
/// user ids.
async fn handle_security_alerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Value>, AppError> {
    if !identify(&headers, state.api_secret.as_deref()).authenticated {
        return Err(AdvisorError::Unauthorized("a valid x-api-key is required".into()).into());
    }
    Ok(Json(serde_json::json!({
        "alerts": state.security.alerts(query.hours),
        "metrics": state.security.metrics(),
    })))
}
