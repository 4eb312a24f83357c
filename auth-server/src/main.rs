mod api;
mod config;
mod errors;
mod health;
mod lifecycle;
mod oauth;
mod openapi;
mod registry;
mod state;
#[cfg(test)]
mod test_utils;
mod token;

use crate::config::{ConfigSnapshot, ConfigurationError, Settings};
use crate::lifecycle::{LifecycleError, LifecycleState, LifecycleView, ServiceLifecycleController};
use crate::registry::RegistryError;
use crate::state::AppState;
use crate::token::SystemClock;
use axum::Router;
use dependency_watchdog::{DependencyWatchdog, DependencyWatchdogOptions};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable};

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Server error: {0}")]
    Serve(std::io::Error),
    #[error("Service failed: {0}")]
    Failed(String),
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Server shutdown complete");
}

async fn run() -> Result<(), StartupError> {
    let settings = Settings::new()?;
    let build = ConfigSnapshot::build(&settings, &|key: &str| std::env::var(key).ok());
    let config = Arc::new(build.snapshot);
    info!("Starting auth server in the {} environment", config.environment);

    let lifecycle = Arc::new(ServiceLifecycleController::new(
        config.environment,
        config.health.failure_threshold,
    ));
    lifecycle.validate_configuration(&build.issues)?;

    let registry = match registry::create_registry(&config.registry).await {
        Ok(registry) => Arc::new(registry),
        Err(e) => return Err(registry_failure(&lifecycle, e).into()),
    };

    let monitor = health::build_monitor(&config, registry.clone());
    lifecycle.complete_startup(monitor.check_all().await)?;

    let watchdog = DependencyWatchdog::start_with_opt(
        monitor,
        DependencyWatchdogOptions {
            check_interval: config.health.check_interval,
            initial_delay: config.health.check_interval,
        },
    );
    let follower = lifecycle.clone().follow(watchdog.subscribe());

    let state = AppState::new(
        config.clone(),
        registry,
        lifecycle.clone(),
        Arc::new(SystemClock),
    );
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    info!("Server running on {}, press Ctrl+C to stop", addr);

    let stop_accepting = CancellationToken::new();
    let mut server = tokio::spawn({
        let stop_accepting = stop_accepting.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop_accepting.cancelled_owned())
                .await
        }
    });

    let failure = tokio::select! {
        _ = shutdown_signal() => None,
        reason = wait_for_failure(lifecycle.subscribe()) => Some(reason),
        result = &mut server => {
            watchdog.stop();
            return match result {
                Ok(Ok(())) => Err(StartupError::Failed("server stopped unexpectedly".to_string())),
                Ok(Err(e)) => Err(StartupError::Serve(e)),
                Err(e) => Err(StartupError::Failed(format!("server task failed: {e}"))),
            };
        }
    };

    if failure.is_none() {
        lifecycle.begin_shutdown("termination signal");
    }
    watchdog.stop();
    follower.abort();
    stop_accepting.cancel();

    let grace = config.shutdown_grace_period;
    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(StartupError::Serve(e)),
        Ok(Err(e)) => error!("Server task failed: {}", e),
        Err(_) => {
            warn!(
                "Grace period of {}s expired, abandoning in-flight requests",
                grace.as_secs()
            );
            server.abort();
        }
    }

    if let Some(reason) = failure {
        return Err(StartupError::Failed(reason));
    }
    if let Err(e) = lifecycle.mark_stopped() {
        warn!("{}", e);
    }
    Ok(())
}

/// Failing to reach the registry store at startup is fatal in every
/// environment; nothing can be issued or refreshed without it.
fn registry_failure(lifecycle: &ServiceLifecycleController, err: RegistryError) -> LifecycleError {
    lifecycle.abort_startup(format!("token registry unavailable: {err}"))
}

/// Create a new application instance with a given state
pub fn create_app(state: AppState) -> Router {
    let (router, api_doc) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(api::router(&state))
        .split_for_parts();

    router
        .merge(Scalar::with_url("/scalar", api_doc))
        .with_state(state)
}

/// Resolves with the reason once the lifecycle reaches FAILED
async fn wait_for_failure(mut states: watch::Receiver<LifecycleView>) -> String {
    match states
        .wait_for(|view| view.state == LifecycleState::Failed)
        .await
    {
        Ok(view) => view.reason.clone(),
        Err(_) => std::future::pending().await,
    }
}

// Simple signal handler that works on all platforms
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
