//! Run command

use std::net::SocketAddr;

use anyhow::{Context, Result};
use indexer::{IndexerClient, JsonParser};
use ingest::{DirectoryWatcher, FileStore, Ingestor, describe_metrics};
use ingest_core::Config;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SERVICE_RESTARTS: &str = "service_restarts";

/// Watch the configured root and index files until Ctrl-C or a watcher failure
pub async fn cmd_run(config: Config) -> Result<()> {
  config.validate().context("Invalid configuration")?;

  if let Some(listen) = config.metrics.listen {
    install_exporter(listen)?;
  }
  metrics::counter!(SERVICE_RESTARTS).increment(1);

  let client = IndexerClient::new(&config.indexer).context("Failed to create indexer client")?;
  if config.indexer.ping_on_start {
    client.ping().await.context("Indexer did not answer ping")?;
  }

  let watcher = DirectoryWatcher::new(&config.watch).context("Failed to start directory watcher")?;
  let store = FileStore::new(watcher.root());
  let ingestor = Ingestor::new(watcher, JsonParser, client, store, &config.ingest)?;
  let metrics = ingestor.metrics();

  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    match tokio::signal::ctrl_c().await {
      Ok(()) => info!("Shutdown signal received"),
      Err(e) => warn!(error = %e, "Cannot listen for shutdown signal"),
    }
    on_signal.cancel();
  });

  info!(root = %config.watch.root.display(), "Starting ingestd");
  let result = ingestor.run(cancel).await;

  let snapshot = metrics.snapshot();
  info!(
    metrics = %serde_json::to_string(&snapshot).unwrap_or_default(),
    "Final ingestion metrics"
  );

  result.context("Ingestion stopped")
}

/// Serve every recorded counter at `http://{listen}/metrics`
fn install_exporter(listen: SocketAddr) -> Result<()> {
  PrometheusBuilder::new()
    .with_http_listener(listen)
    .install()
    .with_context(|| format!("Failed to start metrics exporter on {}", listen))?;

  describe_metrics();
  metrics::describe_counter!(SERVICE_RESTARTS, "Service restarts");
  info!(%listen, "Serving Prometheus metrics");
  Ok(())
}
