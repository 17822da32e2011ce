//! # ggwave-bridge - Main Application Entry Point
//!
//! HTTP and WebSocket front end for the ggwave acoustic modem command-line
//! tools. The server itself never touches audio: every unit of work is handed
//! to an external executable running in a private scratch directory.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared application state, tool bindings and metrics
//! - **modem**: workspaces, process invocation, output extraction, tool pipelines
//! - **handlers**: `/encode`, `/decode` and `/decode-webm`
//! - **websocket**: `/ws/cli` sessions bound to a `ggwave-cli` process
//! - **health**: `/health` and `/metrics`
//! - **middleware**: request metrics
//! - **error**: error types and their JSON responses

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod modem;
mod state;
mod websocket;

#[cfg(test)]
mod test_support;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::{AppConfig, CorsConfig};
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting ggwave-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone());
    let tools = app_state.toolkit().availability();
    if !(tools.to_file && tools.from_file && tools.cli) {
        warn!(
            to_file = tools.to_file,
            from_file = tools.from_file,
            cli = tools.cli,
            "some ggwave tools are missing; the matching endpoints will fail"
        );
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let cors_config = config.cors.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors(&cors_config))
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .configure(handlers::configure)
    })
    .shutdown_timeout(config.server.shutdown_timeout_secs)
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to `ggwave_bridge=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ggwave_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Any origin when the allow-list is empty, otherwise exactly the listed ones.
fn cors(config: &CorsConfig) -> Cors {
    let cors = if config.allowed_origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allow_any_method().allow_any_header().max_age(3600)
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
