use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::StreamExt;

use crate::analytics::{AnalyticsSink, DASHBOARD_WINDOW};
use crate::config::{ChatMode, Config};
use crate::errors::AppError;
use crate::llm_gateway::{single_response_stream, LlmGateway, StreamEvent};
use crate::models::{ChatMessage, ChatRequest, DashboardResponse, DashboardStats, LlmResponse, Role};
use crate::rate_limit::{client_ip, RateLimitDecision, RateLimiter};

/// Longest conversation accepted in one request.
pub const MAX_HISTORY_MESSAGES: usize = 40;

/// Header carrying the requests left for today.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Provider client.
    pub gateway: LlmGateway,
    /// Daily per-IP quota.
    pub rate_limiter: RateLimiter,
    /// Hidden-analysis sink.
    pub analytics: AnalyticsSink,
}

/// A request that passed validation and the quota check.
struct AdmittedTurn {
    history: Vec<ChatMessage>,
    ip: String,
    decision: RateLimitDecision,
}

/// Health check endpoint. Not rate limited.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "porquienvotar-api",
            "version": env!("CARGO_PKG_VERSION"),
            "provider": state.gateway.provider().as_str(),
            "mock": state.gateway.is_mock(),
        })),
    )
}

/// Drops client-supplied system turns and checks the conversation shape.
pub fn sanitize_history(messages: Vec<ChatMessage>) -> Result<Vec<ChatMessage>, AppError> {
    let history: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|m| {
            if m.role == Role::System {
                tracing::debug!("Dropping client-supplied system message");
                return false;
            }
            true
        })
        .collect();

    let Some(last) = history.last() else {
        return Err(AppError::BadRequest("messages must not be empty".to_string()));
    };
    if last.role != Role::User || last.content.trim().is_empty() {
        return Err(AppError::BadRequest(
            "the last message must be a non-empty user message".to_string(),
        ));
    }
    if history.len() > MAX_HISTORY_MESSAGES {
        return Err(AppError::BadRequest(format!(
            "conversation too long (max {} messages)",
            MAX_HISTORY_MESSAGES
        )));
    }

    Ok(history)
}

/// Validates before consuming quota so malformed requests cost nothing.
async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    request: ChatRequest,
) -> Result<AdmittedTurn, AppError> {
    let history = sanitize_history(request.messages)?;
    let ip = client_ip(headers, peer);

    let decision = state.rate_limiter.check(&ip).await;
    if !decision.allowed {
        return Err(AppError::RateLimited(ip));
    }

    Ok(AdmittedTurn {
        history,
        ip,
        decision,
    })
}

fn remaining_header(decision: &RateLimitDecision) -> HeaderValue {
    HeaderValue::from(decision.remaining)
}

/// POST /api/chat
///
/// Uses the calling convention selected by `CHAT_MODE`.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    match state.config.chat_mode {
        ChatMode::Json => chat_complete(State(state), peer, headers, Json(request)).await,
        ChatMode::Stream => chat_stream(State(state), peer, headers, Json(request)).await,
    }
}

/// POST /api/chat/complete
///
/// Blocking completion. Answers with `client_response` only; the hidden
/// analysis is stripped and handed to the analytics sink.
pub async fn chat_complete(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let turn = admit(&state, &headers, peer.map(|ConnectInfo(addr)| addr), request).await?;
    tracing::info!(
        "POST /api/chat/complete - {} messages, {} left today",
        turn.history.len(),
        turn.decision.remaining
    );

    let response = match state.gateway.complete(&turn.history).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("LLM Service Error: {}", e);
            LlmResponse::fallback()
        }
    };

    if let Some(analysis) = response.hidden_analysis {
        state
            .analytics
            .record(&turn.ip, analysis, turn.history.len());
    }

    let mut http_response = Json(response.client_response).into_response();
    http_response
        .headers_mut()
        .insert(REMAINING_HEADER, remaining_header(&turn.decision));
    Ok(http_response)
}

/// POST /api/chat/stream
///
/// Streams the raw JSON text of the answer as it is generated. The client
/// shows the `message` field while it grows and parses the whole body at the
/// end. Analytics are recorded once the final object validates.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let turn = admit(&state, &headers, peer.map(|ConnectInfo(addr)| addr), request).await?;
    tracing::info!(
        "POST /api/chat/stream - {} messages, {} left today",
        turn.history.len(),
        turn.decision.remaining
    );

    let mut events = match state.gateway.stream(&turn.history).await {
        Ok(events) => events,
        Err(e) => {
            tracing::error!("LLM Service Error before streaming: {}", e);
            single_response_stream(LlmResponse::fallback())
        }
    };

    let analytics = state.analytics.clone();
    let ip = turn.ip;
    let conversation_length = turn.history.len();

    let body = async_stream::stream! {
        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::Delta(text)) => yield Ok::<Bytes, std::io::Error>(Bytes::from(text)),
                Ok(StreamEvent::Partial(_)) => {}
                Ok(StreamEvent::Done(response)) => {
                    if let Some(analysis) = response.hidden_analysis {
                        analytics.record(&ip, analysis, conversation_length);
                    }
                }
                Err(e) => {
                    tracing::error!("Stream aborted: {}", e);
                    yield Err(std::io::Error::other(e.to_string()));
                    return;
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(REMAINING_HEADER, remaining_header(&turn.decision))
        .body(Body::from_stream(body))
        .map_err(|e| AppError::InternalError(format!("Failed to build stream response: {}", e)))
}

/// GET /api/v1/dashboard
///
/// Latest analytics logs and their aggregates. Requires
/// `Authorization: Bearer <DASHBOARD_TOKEN>` when a token is configured.
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DashboardResponse>, AppError> {
    validate_dashboard_token(&state, &headers)?;

    let logs = state.analytics.recent(DASHBOARD_WINDOW).await?;
    let stats = DashboardStats::from_logs(&logs);
    tracing::info!(
        "GET /api/v1/dashboard - {} conversations, top concern: {}",
        stats.total_conversations,
        stats.top_concern
    );

    Ok(Json(DashboardResponse { stats, logs }))
}

fn validate_dashboard_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(ref expected) = state.config.dashboard_token else {
        return Ok(());
    };

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing dashboard bearer token".to_string()))?;

    if !constant_time_compare(token.trim(), expected) {
        return Err(AppError::Unauthorized("Invalid dashboard token".to_string()));
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
