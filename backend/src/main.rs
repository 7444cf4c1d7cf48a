//! Stockflow server
//!
//! Runs the periodic alert evaluation and notification dispatch jobs against
//! Postgres and serves a liveness endpoint.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockflow_backend::{
    config::Config,
    services::{scheduler, AlertEvaluator, AlertLifecycle, LoggingSender},
    store::{PgStore, Store},
};

/// State shared with the health handler
#[derive(Clone)]
struct AppState {
    db: sqlx::PgPool,
    environment: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting Stockflow server");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool.clone()));
    let lifecycle = AlertLifecycle::new(
        store.clone(),
        config.alerts.clone(),
        Arc::new(LoggingSender),
    );
    let evaluator = AlertEvaluator::new(store, lifecycle.clone());

    scheduler::spawn_evaluation_loop(
        evaluator,
        Duration::from_secs(config.scheduler.evaluation_interval_secs),
    );
    scheduler::spawn_dispatch_loop(
        lifecycle,
        Duration::from_secs(config.scheduler.dispatch_interval_secs),
        config.scheduler.dispatch_batch_size,
    );

    let state = AppState {
        db: db_pool,
        environment: config.environment.clone(),
    };
    let app = Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to structured JSON output
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "stockflow_server=debug,stockflow_backend=debug,tower_http=debug,sqlx=warn".into()
    });

    let json = std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Liveness plus a database round trip
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let database = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();

    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "environment": state.environment,
    }))
}
