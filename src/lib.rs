pub mod cli;
pub mod collector;
pub mod config;
pub mod dev;
pub mod domain;
pub mod errors;
pub mod health;
pub mod kube;
pub mod logging;
pub mod shutdown;
pub mod sink;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::collector::Collector;
use crate::config::Config;
use crate::dev::events::DevEventSource;
use crate::errors::{AppError, AppResult};
use crate::sink::{LogSink, VictoriaLogsSink};
use crate::source::watch::KubeEventWatch;
use crate::source::watcher::WatchSource;
use crate::source::{EventSource, NamespaceFilter, Readiness};

/// Runs the exporter until `shutdown` fires or the event source finishes.
///
/// Startup failures (cluster client, sink config, health port) are returned
/// before anything is streamed. Cancellation is a clean exit.
pub async fn run(config: Config, shutdown: CancellationToken) -> AppResult<()> {
    let readiness = Readiness::new();
    let filter = NamespaceFilter::new(
        config.include_namespaces.clone(),
        config.exclude_namespaces.clone(),
    );

    // Start the appropriate event source depending on mode.
    let source: Arc<dyn EventSource> = match &config.dev {
        Some(dev) => Arc::new(DevEventSource::new(
            dev.namespace.clone(),
            dev.rate,
            dev.max_events,
            filter,
            readiness.clone(),
        )),
        None => {
            let client = crate::kube::client::make_client().await?;
            let flavor = crate::source::probe::detect_flavor(&client).await;
            Arc::new(WatchSource::new(
                KubeEventWatch::new(client, flavor),
                filter,
                readiness.clone(),
            ))
        }
    };

    let sinks = build_sinks(&config)?;

    let health =
        match crate::health::spawn(config.health_port, readiness.clone(), shutdown.clone()).await
        {
            Ok(handle) => handle,
            Err(e) => {
                stop_sinks(&sinks, config.shutdown_grace).await;
                return Err(e);
            }
        };

    let collector = Collector::new(source, sinks.clone());
    let res = collector.run(shutdown.clone()).await;

    match &res {
        Ok(()) => tracing::info!("collector finished"),
        Err(AppError::Cancelled) => tracing::info!("shutdown requested"),
        Err(e) => tracing::error!(error = %e, "collector stopped"),
    }

    // Also stops the health server when the source ended on its own.
    shutdown.cancel();

    stop_sinks(&sinks, config.shutdown_grace).await;

    if let Err(e) = health.await {
        tracing::error!(error = %e, "health server task failed");
    }

    tracing::info!("shutdown complete");

    match res {
        Ok(()) | Err(AppError::Cancelled) => Ok(()),
        Err(e) => Err(e),
    }
}

fn build_sinks(config: &Config) -> AppResult<Vec<Arc<dyn LogSink>>> {
    let mut sinks: Vec<Arc<dyn LogSink>> = Vec::new();

    if let Some(vl) = &config.victoria_logs {
        sinks.push(Arc::new(VictoriaLogsSink::spawn(vl.clone())?));
    }

    Ok(sinks)
}

/// Flushes every sink; gives up waiting after `grace`.
async fn stop_sinks(sinks: &[Arc<dyn LogSink>], grace: Duration) {
    let all = futures::future::join_all(sinks.iter().map(|s| s.shutdown()));

    if tokio::time::timeout(grace, all).await.is_err() {
        tracing::warn!(grace = ?grace, "sinks did not finish flushing in time");
    }
}
