mod circuit_breaker;
mod config;
mod db;
mod db_storage;
mod disbursement;
mod errors;
mod handlers;
mod models;
mod payment_gateway;
mod services;
mod workflow;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and schema bootstrap.
/// - The shared HTTP client and the in-flight disbursement guard cache.
/// - The payment gateway circuit breaker.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if the server runs successfully, or an error if initialization fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crm_workflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool and bootstrap the CRM schema
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Shared HTTP client for all external collaborators. The 30s timeout is
    // the bound on every dispatch/gateway call; a timeout surfaces as a
    // collaborator failure.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    // In-flight disbursement guard (5 minute TTL covers any gateway call)
    let disbursing_leads_cache = Cache::builder()
        .time_to_live(Duration::from_secs(300))
        .max_capacity(10_000)
        .build();
    tracing::info!("Disbursement guard cache initialized");

    // Circuit breaker shared by all payment gateway calls
    let payment_breaker = Arc::new(circuit_breaker::create_payment_circuit_breaker());

    // Build application state
    let app_state = Arc::new(handlers::AppState {
        db: db.pool.clone(),
        config: config.clone(),
        http,
        disbursing_leads_cache,
        payment_breaker,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        // Lead pipeline
        .route("/api/v1/leads", post(handlers::create_lead).get(handlers::list_leads))
        .route("/api/v1/leads/:id", get(handlers::get_lead))
        .route("/api/v1/leads/:id/status", post(handlers::change_status))
        .route("/api/v1/leads/:id/assign", post(handlers::reassign_lead))
        .route("/api/v1/leads/:id/cibil", post(handlers::cibil_check))
        // Disbursement
        .route(
            "/api/v1/leads/:id/eligibility",
            get(handlers::disbursement_eligibility),
        )
        .route("/api/v1/leads/:id/disburse", post(handlers::disburse_lead))
        .route(
            "/api/v1/leads/:id/bank-details",
            put(handlers::upsert_bank_details),
        )
        .route(
            "/api/v1/leads/:id/bank-details/verify",
            post(handlers::verify_bank_details),
        )
        // Documents
        .route("/api/v1/leads/:id/documents", post(handlers::add_document))
        .route(
            "/api/v1/leads/:id/documents/:name",
            delete(handlers::remove_document),
        )
        // Custom email
        .route("/api/v1/leads/:id/email", post(handlers::send_custom_email))
        // Pipeline vocabulary
        .route(
            "/api/v1/pipeline/:service_type/statuses",
            get(handlers::pipeline_statuses),
        )
        // User management
        .route("/api/v1/users", post(handlers::create_user).get(handlers::list_users))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload (prevents memory exhaustion)
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
