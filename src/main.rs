mod clock;
mod config;
mod error;
mod models;
mod repository;
mod routes;
mod schemas;
mod services;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::Router;
use config::AppConfig;
use services::billing_engine::RunControl;
use state::AppState;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let state = AppState::build(config)?;

    if state.config.internal_api_key.is_none() {
        tracing::warn!("INTERNAL_API_KEY is not set; admin billing routes are open");
    }

    let mut app = Router::new()
        .nest(&state.config.api_prefix, routes::v1_router())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(state.config.request_timeout_seconds.max(1)),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    if state.config.rate_limit_enabled {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(state.config.rate_limit_per_second.max(1))
            .burst_size(state.config.rate_limit_burst_size.max(1))
            .finish()
            .ok_or("invalid rate limit configuration")?;
        app = app.layer(GovernorLayer::new(governor_config));
    }

    let shutdown = RunControl::unbounded();
    let scheduler = state.config.scheduler_enabled.then(|| {
        tokio::spawn(services::scheduler::run_background_scheduler(
            state.clone(),
            shutdown.clone(),
        ))
    });

    let socket_addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        app_name = %state.config.app_name,
        environment = %state.config.environment,
        api_prefix = %state.config.api_prefix,
        scheduler_enabled = state.config.scheduler_enabled,
        "Billing engine listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        // Sweeps stop at the next item boundary; every step is idempotent.
        if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
            tracing::warn!("Scheduler did not stop within 30s; abandoning in-flight run");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, finishing in-flight requests");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
