use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use giftbay_settlement::api;
use giftbay_settlement::config::AppConfig;
use giftbay_settlement::database::{
    event_log_repository::EventLogRepository, init_pool_from_config,
    subscription_repository::SubscriptionRepository,
    transaction_repository::TransactionRepository, wallet_repository::WalletRepository,
};
use giftbay_settlement::gateway::client::SettlementGateway;
use giftbay_settlement::health::{HealthChecker, HealthState, HealthStatus};
use giftbay_settlement::logging::init_tracing;
use giftbay_settlement::middleware::auth::{AuthProvider, RemoteAuthProvider};
use giftbay_settlement::middleware::logging::{request_logging_middleware, UuidRequestId};
use giftbay_settlement::services::settlement::{SettlementConfig, SettlementService};
use giftbay_settlement::services::wallet::WalletService;
use giftbay_settlement::workers::reconciliation::{ReconciliationConfig, ReconciliationWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        anyhow::anyhow!(e)
    })?;
    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting GiftBay settlement service"
    );

    // Initialize database connection pool
    info!("📊 Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e)
    })?;
    info!(
        max_connections = config.database.max_connections,
        "✅ Database connection pool initialized"
    );

    // Initialize the gateway client. A bad key or iv aborts startup here,
    // before any request can reach a half-configured cipher.
    info!(
        cipher_mode = %config.gateway.cipher_mode,
        "🔐 Initializing payment gateway client..."
    );
    let gateway = Arc::new(SettlementGateway::new(&config.gateway).map_err(|e| {
        error!("Gateway configuration rejected: {}", e);
        anyhow::anyhow!(e)
    })?);
    info!(
        client_code = %config.gateway.client_code,
        "✅ Payment gateway client initialized"
    );

    let auth: Arc<dyn AuthProvider> = Arc::new(RemoteAuthProvider::new(&config.auth)?);

    // Wire repositories and services
    let transactions = Arc::new(TransactionRepository::new(db_pool.clone()));
    let wallet_store = Arc::new(WalletRepository::new(db_pool.clone()));
    let events = Arc::new(EventLogRepository::new(db_pool.clone()));
    let subscriptions = Arc::new(SubscriptionRepository::new(db_pool.clone()));

    let wallets = Arc::new(WalletService::new(wallet_store));
    let settlement = Arc::new(SettlementService::new(
        transactions,
        wallets.clone(),
        events,
        subscriptions,
        gateway,
        SettlementConfig::from_env(),
    ));

    // Initialize health checker
    let health_checker = HealthChecker::new(db_pool.clone());

    // Reconciliation worker
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let recon_config = ReconciliationConfig::from_env();
    let mut recon_handle = None;
    if recon_config.enabled {
        info!(
            poll_interval_secs = recon_config.poll_interval.as_secs(),
            batch_size = recon_config.batch_size,
            min_age_minutes = recon_config.min_age_minutes,
            "Starting payment reconciliation worker"
        );
        let worker = ReconciliationWorker::new(settlement.clone(), recon_config);
        recon_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else {
        info!("Payment reconciliation worker disabled (RECON_ENABLED=false)");
    }

    // Create the application router with logging middleware
    info!("🛣️  Setting up application routes...");

    let payment_routes = api::payments::router(
        api::payments::PaymentApiState {
            settlement: settlement.clone(),
            redirects: api::payments::RedirectTargets::new(&config.gateway.frontend_base_url),
        },
        auth.clone(),
    );
    let wallet_routes = api::wallet::router(
        api::wallet::WalletApiState {
            wallets: wallets.clone(),
        },
        auth.clone(),
    );

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker })
        .merge(payment_routes)
        .merge(wallet_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    // Run the server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = recon_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for reconciliation worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    "GiftBay Settlement Service"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        return Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ));
    }

    Ok(Json(health_status))
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    // Readiness checks all dependencies
    health(axum::extract::State(state)).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
