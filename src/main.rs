//! Main binary for Portico Gateway

use portico_gateway::audit::AuditLog;
use portico_gateway::auth::client::AuthClient;
use portico_gateway::config::GatewayConfig;
use portico_gateway::health::HealthChecker;
use portico_gateway::http::{AppState, HttpServer};
use portico_gateway::proxy::ProxyEngine;
use portico_gateway::registry::ServiceRegistry;
use portico_gateway::routing::RoutingService;
use portico_gateway::storage::{ServiceStore, SqliteStore};
use portico_gateway::users::UserGateway;
use portico_gateway::{CONTEXT_PATH, GATEWAY_NAME, GATEWAY_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration before logging so the log level can come from it
    let config = GatewayConfig::load()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting {} v{}", GATEWAY_NAME, GATEWAY_VERSION);
    info!(
        "Configuration loaded: server={}:{}, db={}, auth={}",
        config.server.host, config.server.port, config.database.path, config.auth.base_url
    );

    // Storage
    let store = Arc::new(SqliteStore::new(&config.database.path).await?);

    // Authentication collaborator; an outage is logged but must not keep
    // the routing path from coming up
    let auth = Arc::new(AuthClient::new(
        config.auth.base_url.clone(),
        config.auth.timeout,
    )?);
    match auth.health().await {
        Ok(()) => info!("Authentication service connection successful"),
        Err(e) => warn!(
            "Authentication service unreachable at {}: {:?}",
            config.auth.base_url, e
        ),
    }

    // Registry warmed from storage, audit log, health checker
    let registry = Arc::new(ServiceRegistry::new(Arc::clone(&store) as Arc<dyn ServiceStore>).await);
    let audit = Arc::new(AuditLog::new(Arc::clone(&store) as Arc<dyn ServiceStore>));

    let checker = Arc::new(HealthChecker::new(
        Arc::clone(&registry),
        Arc::clone(&audit),
        config.health_check.clone(),
    )?);
    Arc::clone(&checker).start().await;

    // Routing and user pass-through
    let proxy = Arc::new(ProxyEngine::new(config.proxy.request_timeout)?);
    let routing = Arc::new(RoutingService::new(Arc::clone(&registry), proxy));
    let users = Arc::new(UserGateway::new(
        config.auth.base_url.clone(),
        config.auth.timeout,
    )?);

    let state = Arc::new(AppState::new(
        &config, registry, audit, routing, auth, users,
    )?);

    let app = HttpServer::new(config.clone(), state).create_router();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("{} listening on {}", GATEWAY_NAME, addr);
    info!("Management API available at: {}", CONTEXT_PATH);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Tear down in reverse dependency order
    info!("Shutting down components...");
    checker.stop().await;
    store.shutdown().await?;

    info!("Gateway stopped gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, shutting down");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down");
        }
    }
}
