use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use porquienvotar_api::api::{handlers::AppState, routes::build_router};
use porquienvotar_api::config::{Config, RateLimitStoreKind};
use porquienvotar_api::data::{
    analytics::AnalyticsSink,
    db::Database,
    rate_limit::{CounterStore, RateLimiter},
};
use porquienvotar_api::integrations::llm_gateway::LlmGateway;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the optional database, the rate
/// limiter, the LLM gateway and the analytics sink, then starts the Axum
/// server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "porquienvotar_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // The pool connects lazily: an unreachable database degrades to
    // fail-open rate limiting and logged analytics instead of a crash. The
    // schema bootstrap is retried on first use until it succeeds.
    let db = match config.database_url {
        Some(ref url) => {
            let db = Database::lazy(url)?;
            if let Err(e) = db.ensure_schema().await {
                tracing::error!("Database unavailable at startup, retrying on first use: {}", e);
            }
            Some(db)
        }
        None => {
            tracing::warn!("No database configured, analytics are only logged");
            None
        }
    };

    let store = match (config.rate_limit_store, db.clone()) {
        (RateLimitStoreKind::Postgres, Some(db)) => CounterStore::Postgres(db),
        (RateLimitStoreKind::Memory, _) => CounterStore::memory(),
        _ => {
            tracing::warn!("Rate limiting disabled");
            CounterStore::Disabled
        }
    };
    let rate_limiter = RateLimiter::new(store, config.rate_limit_daily);
    tracing::info!(
        "Rate limiter initialized ({} requests per IP per day)",
        rate_limiter.daily_limit()
    );

    let gateway = LlmGateway::new(&config.llm)?;

    let app_state = Arc::new(AppState {
        config: config.clone(),
        gateway,
        rate_limiter,
        analytics: AnalyticsSink::new(db),
    });

    let app = build_router(app_state)?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
