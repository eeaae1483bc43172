//! Coderoom Hub
//!
//! Real-time coordination server for shared coding rooms.
//!
//! # Servers
//!
//! - HTTP + WebSocket server for clients (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Load the room store
//! 4. Spawn the document writer and the actor system
//! 5. Start the health server, then the client server
//! 6. Mark ready and wait for a shutdown signal
//!
//! # Shutdown Flow
//!
//! 1. Mark not ready
//! 2. Drain the actor system (connections close, rooms flush documents)
//! 3. Stop the document writer after its last writes
//! 4. Stop both HTTP servers

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use common::config::LogFormat;
use hub_service::access::AccessGate;
use hub_service::actors::{ActorMetrics, HubControllerActorHandle, RoomDeps, RoomSettings};
use hub_service::config::Config;
use hub_service::observability::{health_router, init_metrics_recorder, HealthState};
use hub_service::routes::{build_routes, AppState};
use hub_service::store::{MemoryRoomStore, RoomStore};
use hub_service::sync::DocumentWriter;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize tracing
    let json = config.observability.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.observability.log_filter.clone().into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        document_debounce_ms = config.document_debounce.as_millis(),
        recent_message_limit = config.recent_message_limit,
        max_message_length = config.max_message_length,
        store_timeout_ms = config.store_timeout.as_millis(),
        "Starting Coderoom hub"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let store: Arc<dyn RoomStore> = match &config.rooms_seed_file {
        Some(path) => {
            let store = MemoryRoomStore::from_seed_file(path).await.map_err(|e| {
                error!(error = %e, path = %path, "Failed to load room seed file");
                e
            })?;
            info!(path = %path, "Room store seeded");
            Arc::new(store)
        }
        None => {
            warn!("No HUB_ROOMS_SEED_FILE set, starting with an empty room store");
            Arc::new(MemoryRoomStore::new())
        }
    };

    // The writer outlives the actor system so rooms can flush into it
    let writer_token = CancellationToken::new();
    let (writer, writer_task) = DocumentWriter::spawn(
        Arc::clone(&store),
        config.document_debounce,
        config.store_timeout,
        writer_token.clone(),
    );

    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let controller = HubControllerActorHandle::new(
        RoomDeps {
            store: Arc::clone(&store),
            writer,
            settings: RoomSettings {
                recent_message_limit: config.recent_message_limit,
                max_message_length: config.max_message_length,
                store_timeout: config.store_timeout,
            },
        },
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    // Servers stop last, after the actor system has drained
    let server_token = CancellationToken::new();

    // Health server (liveness, readiness, metrics)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown = server_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Client server (authorize + WebSocket)
    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let state = Arc::new(AppState {
        controller: controller.clone(),
        gate: AccessGate::new(Arc::clone(&store), config.store_timeout),
        metrics: Arc::clone(&actor_metrics),
        config: config.clone(),
    });
    let app = build_routes(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
        error!(error = %e, addr = %bind_addr, "Failed to bind client server");
        format!("Failed to bind client server to {bind_addr}: {e}")
    })?;

    let app_shutdown = server_token.child_token();
    let app_task = tokio::spawn(async move {
        info!(addr = %bind_addr, "Client server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            app_shutdown.cancelled().await;
            info!("Client server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Client server failed");
        }
    });

    health_state.set_ready();
    info!("Coderoom hub running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    if let Err(e) = controller.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    writer_token.cancel();
    if let Err(e) = writer_task.await {
        warn!(error = %e, "Document writer did not stop cleanly");
    }

    server_token.cancel();
    let _ = tokio::join!(app_task, health_task);

    info!("Coderoom hub shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
