//! Supervisor / wiring (component G, §4.G).
//!
//! Loads configuration, initialises logging, opens the Mongo and Kafka
//! connections, reconstructs `lastNonce` from persisted Activities, starts
//! the subscription loop and the nonce monitor, serves `/metrics` and
//! `/health`, and shuts everything down cooperatively on SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bus;
mod collateral;
mod config;
mod decoder;
mod metrics;
mod models;
mod monitor;
mod pipeline;
mod planner;
mod repository;

use crate::bus::KafkaBus;
use crate::config::AppConfig;
use crate::metrics::MetricsCollector;
use crate::monitor::NonceMonitor;
use crate::pipeline::{Pipeline, PickupOutcome};
use crate::repository::{ActivityRepository, MongoRepositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;
    init_tracing(&config);

    tracing::info!("starting kprime-pickup v{}", env!("CARGO_PKG_VERSION"));

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_url).await?;
    let mongo_db = mongo_client.database(&config.mongo_database);
    tracing::info!(database = %config.mongo_database, "database connected");

    let repos = Arc::new(MongoRepositories::new(&mongo_db));

    let bus = Arc::new(KafkaBus::connect(&config.broker_url, &config.consumer_group_id).await?);
    tracing::info!(broker = %config.broker_url, group = %config.consumer_group_id, "bus connected");

    let last_nonce = repos.max_nonce().await?.unwrap_or(0);
    tracing::info!(last_nonce, "reconstructed last nonce from persisted activities");

    let metrics_collector = Arc::new(MetricsCollector::new());
    let metrics_handle = metrics::init_metrics();

    let pipeline = Arc::new(Pipeline::new(
        bus.clone(),
        repos.clone(),
        repos.clone(),
        repos.clone(),
        repos.clone(),
        metrics_collector,
        last_nonce,
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_notify = Arc::new(Notify::new());
    let subscription = tokio::spawn(run_subscription(
        bus.clone(),
        pipeline,
        stop.clone(),
        stop_notify.clone(),
    ));

    let monitor = Arc::new(NonceMonitor::new(
        repos.clone(),
        repos,
        config.matching_engine_url.clone(),
        config.nonce_diff,
    ));
    let monitor_task = tokio::spawn({
        let monitor = monitor.clone();
        let interval = config.monitoring_interval;
        async move { monitor.run(interval).await }
    });

    let health_app = Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());
    let health_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    tracing::info!(addr = %health_addr, "health server listening");
    let health_server = tokio::spawn(async move {
        if let Err(err) = axum::serve(health_listener, health_app).await {
            tracing::error!(%err, "health server exited");
        }
    });

    let metrics_app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(TraceLayer::new_for_http());
    let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    tracing::info!(addr = %metrics_addr, "metrics server listening");
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, metrics_app).await {
            tracing::error!(%err, "metrics server exited");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight work");

    // Tell the subscription loop to stop fetching new messages, but don't
    // abort it: a `handle()` call already in flight must reach a terminal
    // `PickupOutcome` on its own, per §5/§10.4. The monitor and the HTTP
    // servers have no such in-flight-commit contract, so those can just
    // be aborted.
    stop.store(true, Ordering::SeqCst);
    stop_notify.notify_waiters();
    monitor_task.abort();
    server.abort();
    health_server.abort();

    if let Err(err) = subscription.await {
        tracing::error!(%err, "subscription task ended abnormally during shutdown");
    }

    bus.close().await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Fetches messages from the bus and hands each one to the pipeline. A
/// fetch error is logged and retried — it must never bring this loop down,
/// matching the Go source's `Subscribe` retry-on-error behaviour.
///
/// Stops cooperatively: `stop` is checked before every fetch, and waiting
/// on `bus.recv()` races against `stop_notify` so shutdown doesn't have to
/// wait for the next message to arrive. Once a message is handed to
/// `pipeline.handle()`, this loop always awaits it to completion before
/// checking `stop` again — shutdown never interrupts an in-flight handle.
async fn run_subscription(
    bus: Arc<KafkaBus>,
    pipeline: Arc<Pipeline<KafkaBus, MongoRepositories, MongoRepositories, MongoRepositories, MongoRepositories>>,
    stop: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let msg = tokio::select! {
            result = bus.recv() => match result {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::error!(%err, "failed to fetch message, retrying");
                    continue;
                }
            },
            _ = stop_notify.notified() => break,
        };

        tracing::debug!(topic = %msg.topic, offset = msg.offset, "received message");

        let outcome = pipeline.handle(msg).await;
        match outcome {
            PickupOutcome::Committed => {}
            PickupOutcome::Skipped => tracing::warn!("poisoned message skipped"),
            PickupOutcome::Deferred => tracing::warn!("message deferred for redelivery"),
        }
    }

    tracing::info!("subscription loop stopped, no handle() call in flight");
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kprime_pickup=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);

    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health_check() -> &'static str {
    "OK"
}
