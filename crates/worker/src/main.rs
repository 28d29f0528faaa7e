//! Maintenance worker entry point.

use reservation::{StockContext, StockEngine};
use sqlx::postgres::PgPoolOptions;
use stock_store::{PostgresAuthoritativeStore, RedisStockStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{Config, LogFormat, LogSettings, MaintenanceWorker, WorkerError};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    // 1. Initialize tracing before loading settings that may log warnings
    init_tracing(&LogSettings::from_env());
    let config = Config::from_env();

    // 2. Install Prometheus exporter with its own listener
    if let Some(addr) = config.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| WorkerError::Metrics(e.to_string()))?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    // 3. Connect to both stores
    let store = RedisStockStore::connect(&config.redis_url).await?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(stock_store::StoreError::from)?;
    let authoritative = PostgresAuthoritativeStore::new(pool);
    authoritative.run_migrations().await?;

    // 4. Build the engine
    let ctx = StockContext::new(store, authoritative, config.stock.clone());
    let worker = MaintenanceWorker::new(StockEngine::new(ctx), config.sweep_interval);

    // 5. Warm the fast path
    if config.warmup_on_start
        && let Err(e) = worker.warmup().await
    {
        tracing::error!(error = %e, "warmup failed, counters will hydrate on demand");
    }

    // 6. Maintenance loop
    tracing::info!(interval_secs = config.sweep_interval.as_secs(), "starting maintenance loop");
    worker.run_until(shutdown_signal()).await;

    tracing::info!("worker shut down gracefully");
    Ok(())
}
