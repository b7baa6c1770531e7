//! Playfeed Engine
//!
//! Game and playlist recommendation service with dynamic feed population.
//!
//! # Architecture
//!
//! - **Recommendation Engine**: low-rank fused recommendations over behavioral signals
//! - **Feed Jobs**: populate dynamic items, priorities and per-user feeds
//! - **API Server**: REST endpoints for queries and on-demand job runs
//!
//! # Graceful Shutdown
//!
//! The engine handles SIGTERM and SIGINT signals, ensuring:
//! - In-flight requests complete
//! - A scheduled job run in progress is not interrupted mid-commit
//! - Database connections are closed cleanly

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use playfeed::api::{self, AppState};
use playfeed::database::{self, Database};
use playfeed::feed::FeedJobs;
use playfeed::recommendation::RecommendationEngine;
use playfeed::store::PgStore;
use playfeed::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_tracing();

    info!("Playfeed Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(Config::from_env().context("failed to load configuration")?);
    info!("Configuration loaded and validated");

    #[cfg(feature = "prometheus")]
    install_metrics_exporter(config.api.metrics_port)?;

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize database connection pool
    let db = Database::new(&config.database).await?;
    db.health_check().await?;
    let stats = db.stats();
    info!(
        "Database connection pool established (size: {}, idle: {})",
        stats.size, stats.idle
    );

    database::run_migrations(db.pool()).await?;

    let store = Arc::new(PgStore::new(db.pool().clone()));
    let engine = RecommendationEngine::new(store.clone(), config.recommendation.clone())?;
    let jobs = FeedJobs::new(store, engine.clone(), config.feed.clone());
    let state = Arc::new(AppState { engine, jobs });

    let mut handles = Vec::new();

    if let Some(interval) = config.jobs.interval {
        info!("Scheduling feed jobs every {:?}", interval);
        handles.push(spawn_job_scheduler(
            state.clone(),
            interval,
            shutdown_tx.subscribe(),
        ));
    }

    handles.push(spawn_api_server(
        state.clone(),
        config.clone(),
        shutdown_tx.subscribe(),
    ));

    info!("All services started");
    info!("  API: http://{}:{}", config.api.host, config.api.port);
    info!(
        "  Health: http://{}:{}/health",
        config.api.host, config.api.port
    );

    // Wait for shutdown signal or service failure
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        _ = wait_for_any_failure(&mut handles) => {
            warn!("A service stopped unexpectedly, initiating shutdown");
        }
    }

    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(());

    let shutdown_timeout = Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, shutdown_services(handles))
        .await
        .is_err()
    {
        warn!("Shutdown timeout exceeded, forcing exit");
    }

    db.close().await;

    info!("Playfeed Engine stopped gracefully");
    Ok(())
}

/// Initialize structured logging with tracing
///
/// `LOG_FORMAT=json` switches to JSON lines; `NO_COLOR` disables ANSI colors.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default log levels
        EnvFilter::new("playfeed_engine=debug,playfeed=debug,tower_http=debug,sqlx=warn,info")
    });

    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer.clone())
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(std::env::var("NO_COLOR").is_err())
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    guard
}

#[cfg(feature = "prometheus")]
fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("failed to install Prometheus exporter")?;
    info!("Prometheus metrics exposed on port {}", port);
    Ok(())
}

/// Spawn the scheduled refresh of every feed job
fn spawn_job_scheduler(
    state: Arc<AppState>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip first tick (runs immediately otherwise)
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("Running scheduled feed jobs...");
                    match state.jobs.run_all().await {
                        Ok(_) => info!("Scheduled feed jobs completed"),
                        Err(e) => error!("Scheduled feed jobs failed: {:?}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Job scheduler shutting down");
                    break;
                }
            }
        }
    })
}

/// Spawn the API server
fn spawn_api_server(
    state: Arc<AppState>,
    config: Arc<Config>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
            info!("API server shutting down");
        };
        if let Err(e) = api::start_server(state, &config.api, shutdown).await {
            error!("API server error: {:?}", e);
        }
    })
}

/// Wait for any task to finish
async fn wait_for_any_failure(handles: &mut [tokio::task::JoinHandle<()>]) {
    loop {
        if handles.iter().any(|h| h.is_finished()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for all services to complete shutdown
async fn shutdown_services(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}
