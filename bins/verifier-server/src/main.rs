mod config;
mod container;
mod docker;
mod engine;
mod error;
mod executor;
mod handlers;
mod limiter;
mod logs;
mod response;
mod routes;
#[cfg(test)]
mod testing;
mod watcher;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;
use docker::DockerEngine;
use engine::EngineClient;
use executor::Executor;
use watcher::Watcher;

pub struct AppState {
    pub executor: Arc<Executor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    // Initialize tracing subscriber
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);
    if settings.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Verifier server booting...");
    info!(
        docker_host = %settings.docker_host,
        cert_dir = ?settings.cert_dir(),
        "Connecting to Docker"
    );

    let docker = DockerEngine::connect(&settings.docker_host, settings.cert_dir())?;
    docker.ping().await?;
    info!("Connected to Docker");

    let engine: Arc<dyn EngineClient> = Arc::new(docker);
    let watcher = Arc::new(Watcher::new());
    let events = watcher.start(Arc::clone(&engine));

    let executor = Arc::new(Executor::new(engine, watcher, settings.to_verifier_config()));
    info!(
        max_jobs = executor.limiter().capacity(),
        timeout_ms = executor.config().timeout.as_millis() as u64,
        keep_containers = executor.config().keep_containers,
        "Job settings"
    );

    let state = Arc::new(AppState {
        executor: Arc::clone(&executor),
    });
    let app = routes::app(state);

    let listener = TcpListener::bind(settings.http)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.http))?;
    info!("HTTP server listening on {}", settings.http);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(executor))
        .await
        .context("Server error")?;

    if let Some(events) = events {
        events.abort();
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, after closing admission.
async fn shutdown_signal(executor: Arc<Executor>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!(
        running_jobs = executor
            .limiter()
            .capacity()
            .saturating_sub(executor.limiter().available()),
        "Received shutdown signal, finishing in-flight jobs..."
    );
    executor.shutdown();
}
