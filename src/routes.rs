use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::handlers::{self, AppState};

/// Request bodies above this size are rejected before reaching a handler.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Builds the application router.
///
/// The daily quota is enforced per chat turn inside the handlers; the governor
/// layer only absorbs bursts (2 req/s per IP, burst of 10) on the API routes.
pub fn build_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(10)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/chat/complete", post(handlers::chat_complete))
        .route("/api/chat/stream", post(handlers::chat_stream))
        .route("/api/v1/dashboard", get(handlers::dashboard))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting.
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Ok(app)
}
