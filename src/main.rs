//! Quality Cycle — autonomous AI quality-monitoring and optimization
//! orchestrator.
//!
//! Wires C1-C7 into the orchestrator (C8), spawns its four background
//! tasks, and serves the public control surface (spec §4.8, §6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::middleware as axum_mw;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quality_cycle::config::Config;
use quality_cycle::middleware::{rate_limit::rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use quality_cycle::orchestrator::{spawn_all, AppState};

/// Quality Cycle: autonomous AI quality-monitoring and optimization orchestrator.
#[derive(Parser, Debug)]
#[command(name = "quality-cycle", version)]
struct Cli {
    /// Bind port for the control HTTP surface; overrides HTTP_PORT.
    #[arg(long, env = "HTTP_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.http_port = port;
    }

    std::fs::create_dir_all(&config.snapshot_dir)?;
    if let Some(parent) = std::path::Path::new(&config.learning_store_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = std::path::Path::new(&config.deployment_log_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let state = AppState::new(Arc::new(config))?;
    info!("quality cycle orchestrator initialized");

    let task_handles = spawn_all(state.clone());

    let rate_limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: state.config.control_rate_limit_per_minute,
        window: Duration::from_secs(60),
        burst: 0,
    });

    let app = quality_cycle::api::build_router(state.clone())
        .layer(axum_mw::from_fn(request_logging))
        .layer(axum_mw::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control surface listening");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                warn!(error = %e, "http server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = state.shutdown.send(());
    let drain = async {
        for handle in task_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(state.config.shutdown_grace, drain).await.is_err() {
        warn!("graceful shutdown grace period elapsed, dropping remaining tasks");
    } else {
        info!("all background tasks drained");
    }

    Ok(())
}
