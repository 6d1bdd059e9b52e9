//! Remote attestation server
//!
//! Issues one-shot challenges, verifies hardware-backed attestation
//! evidence against a fingerprint catalogue, and persists per-device
//! pinning records with first-use pinning and continuity enforcement.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod types;

use axum::http::{header, HeaderName, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use uuid::Uuid;

use config::Config;

/// Request ID header name
const X_REQUEST_ID: &str = "x-request-id";

/// Boots the server: pools, migrations, background tasks, and the HTTP
/// listener. Runs until a shutdown signal is received.
pub async fn run(config: Config) {
    init_tracing(&config.log_format);

    tracing::info!("starting attestation server");

    let pool = db::create_pool(&config)
        .await
        .expect("failed to create primary database pool");
    let samples_pool = db::create_samples_pool(&config)
        .await
        .expect("failed to create samples database pool");
    tracing::info!("database connection pools created");

    db::run_migrations(&pool)
        .await
        .expect("failed to run primary database migrations");
    db::run_samples_migrations(&samples_pool)
        .await
        .expect("failed to run samples database migrations");
    tracing::info!("database migrations completed");

    // Initialize challenge store for attestation verification (§4.1)
    let challenge_store = services::ChallengeStore::new(config.challenge_ttl_secs, config.challenge_capacity);
    let _cleanup_handle = services::ChallengeStore::spawn_cleanup_task(challenge_store.clone());
    tracing::info!("challenge index initialized");

    // Spawn the Alert Dispatcher and Maintenance Loop background tasks (§4.4, §4.5)
    let mailer: Arc<dyn services::Mailer> = Arc::new(
        services::SmtpMailer::new(
            &config.smtp_host,
            config.smtp_port,
            &config.smtp_username,
            &config.smtp_password,
            &config.alert_from_address,
        )
        .expect("failed to configure smtp mailer"),
    );
    let _alert_handle = services::alert_dispatcher::spawn(
        pool.clone(),
        mailer,
        config.alert_from_address.clone(),
        config.alert_tick_secs,
    );
    let _maintenance_handle = services::maintenance::spawn(
        pool.clone(),
        config.retention_horizon_days,
        config.maintenance_tick_secs,
        config.database_url.clone(),
        config.backup_dir.clone(),
    );
    tracing::info!("background tasks spawned");

    let cors = build_cors_layer(&config.cors_origins);
    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    let app_state = routes::AppState {
        db: pool.clone(),
        samples_db: samples_pool.clone(),
        challenge_store,
        config: Arc::new(config.clone()),
    };

    let app = routes::api_router(app_state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(PropagateRequestIdLayer::new(x_request_id))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|request: &axum::http::Request<_>| {
                        let request_id = request
                            .headers()
                            .get(X_REQUEST_ID)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| Uuid::parse_str(s).ok())
                            .unwrap_or_else(Uuid::new_v4);

                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %request_id,
                        )
                    })
                    .on_response(
                        |response: &axum::http::Response<_>, latency: Duration, _span: &Span| {
                            tracing::info!(
                                status = %response.status().as_u16(),
                                latency_ms = %latency.as_millis(),
                                "request completed"
                            );
                        },
                    ),
            )
            .layer(cors)
            .layer(axum::middleware::from_fn(extract_request_id)),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("invalid host:port combination");
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_timeout_secs))
        .await
        .unwrap();

    pool.close().await;
    samples_pool.close().await;
    tracing::info!("server shutdown complete");
}

/// Initialize tracing subscriber based on format preference.
fn init_tracing(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    match log_format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_span_events(FmtSpan::CLOSE))
                .init();
        }
    }
}

/// Build CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        tracing::warn!("no CORS origins configured, allowing any origin");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::ACCEPT,
                HeaderName::from_static(X_REQUEST_ID),
            ])
    } else {
        let allowed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::ACCEPT,
                HeaderName::from_static(X_REQUEST_ID),
            ])
    }
}

/// Middleware to extract request ID from headers and add as extension.
async fn extract_request_id(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut request = request;
    request.extensions_mut().insert(request_id);

    next.run(request).await
}

/// Shutdown signal handler for graceful shutdown.
///
/// Listens for SIGINT (Ctrl+C) and SIGTERM signals.
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM");
        },
    }

    tracing::info!(
        "shutdown signal received, starting graceful shutdown (timeout: {}s)",
        timeout_secs
    );
}
