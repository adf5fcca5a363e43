//! Service entry point: configuration, infrastructure wiring, HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use storefront_payments::adapters::audit::BestEffortAuditLogger;
use storefront_payments::adapters::http::payment::{payment_routes, PaymentAppState};
use storefront_payments::adapters::postgres::{
    PostgresAuditLogger, PostgresOrderRepository, PostgresSubscriptionRepository,
    PostgresWebhookEventRepository,
};
use storefront_payments::adapters::rate_limiter::{RateLimitConfig, RedisRateLimiter};
use storefront_payments::adapters::secrets::ConfigSecretProvider;
use storefront_payments::application::handlers::payment::HandleKashierWebhook;
use storefront_payments::config::AppConfig;
use storefront_payments::domain::payment::KashierWebhookVerifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config);

    tracing::info!(
        environment = ?config.server.environment,
        merchant = %config.kashier.merchant_id,
        test_mode = config.kashier.is_test_mode(),
        "starting storefront payments service"
    );

    // ── Postgres ─────────────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    // ── Redis ────────────────────────────────────────────────────────
    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = tokio::time::timeout(
        config.redis.timeout(),
        redis_client.get_multiplexed_tokio_connection(),
    )
    .await
    .map_err(|_| "timed out connecting to redis")??;

    // ── Wiring ───────────────────────────────────────────────────────
    let rate_limiter = Arc::new(RedisRateLimiter::new(
        redis_conn,
        RateLimitConfig::default(),
    ));
    let audit = Arc::new(BestEffortAuditLogger::new(Arc::new(PostgresAuditLogger::new(
        pool.clone(),
    ))));

    let webhook_handler = Arc::new(HandleKashierWebhook::new(
        KashierWebhookVerifier::new(config.kashier.timestamp_tolerance_secs),
        Arc::new(ConfigSecretProvider::new(config.kashier.clone())),
        rate_limiter,
        Arc::new(PostgresWebhookEventRepository::new(pool.clone())),
        Arc::new(PostgresOrderRepository::new(pool.clone())),
        Arc::new(PostgresSubscriptionRepository::new(pool.clone())),
        audit,
    ));

    let state = PaymentAppState::new(webhook_handler);

    let app = Router::new()
        .nest("/payment", payment_routes().with_state(state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    // ── Serve ────────────────────────────────────────────────────────
    let addr = config.server.socket_addr()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone()));

    if config.is_production() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
