use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use giftreg_core::crypto::PiiCipher;
use giftreg_core::engine::ReservationEngine;
use giftreg_core::notify::ReservationNotifier;
use giftreg_db::backend::{PgBackend, PgDataKeyProvider};
use giftreg_events::{EmailConfig, EmailNotifier, LogNotifier};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use giftreg_api::background::reservation_expiry;
use giftreg_api::config::ServerConfig;
use giftreg_api::router::build_app_router;
use giftreg_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "giftreg_api=debug,giftreg_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = giftreg_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    giftreg_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    giftreg_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- PII encryption ---
    let cipher = match &config.pii_master_key {
        Some(master) => {
            let provider = PgDataKeyProvider::new(pool.clone(), master.clone());
            let cipher = PiiCipher::from_provider(&provider)
                .await
                .expect("Failed to load the PII data key");
            tracing::info!("PII encryption enabled");
            cipher
        }
        None => {
            tracing::warn!("PII_MASTER_KEY not set; guest contact details are stored in plaintext");
            PiiCipher::disabled()
        }
    };

    // --- Notifications ---
    let notifier: Arc<dyn ReservationNotifier> = match EmailConfig::from_env() {
        Some(email_config) => {
            let notifier =
                EmailNotifier::new(&email_config).expect("Failed to build the SMTP transport");
            tracing::info!(smtp_host = %email_config.smtp_host, "Email notifications enabled");
            Arc::new(notifier)
        }
        None => {
            tracing::warn!("SMTP_HOST not set; reservation notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    // --- Reservation engine ---
    let backend = Arc::new(PgBackend::new(pool.clone(), cipher.clone()));
    let engine = ReservationEngine::new(
        backend.clone(),
        backend.clone(),
        backend,
        notifier,
        cipher,
        config.reservations.settings(),
    );

    // --- Expiry sweep ---
    let expiry_cancel = CancellationToken::new();
    let expiry_handle = tokio::spawn(reservation_expiry::run(
        engine.clone(),
        config.reservations.sweep_interval(),
        expiry_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        engine,
        pool: Some(pool),
        config: Arc::new(config.clone()),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    expiry_cancel.cancel();
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(shutdown_timeout, expiry_handle).await.is_err() {
        tracing::warn!("Reservation expiry job did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
