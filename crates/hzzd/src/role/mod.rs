//! Process roles and the pieces they share.

pub mod broker;
pub mod collect;
pub mod local;
pub mod produce;
pub mod work;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use hzz_core::catalog::VariantMetadata;
use hzz_core::config::{BrokerConfig, PipelineConfig};
use hzz_services::{
    connect_with_retry, Broker, Chunker, CollectorSettings, HttpBroker, ProducerSettings,
    WorkerSettings,
};

/// Forward ctrl-c to `tx`.
pub fn forward_ctrl_c(tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = tx.send(());
    });
}

/// A shutdown channel fed by ctrl-c.
pub fn shutdown_channel() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(4);
    forward_ctrl_c(tx.clone());
    tx
}

/// Connect to the broker daemon, retrying until it answers. `None` if a
/// shutdown arrives first.
pub async fn connect(
    config: &BrokerConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<Arc<dyn Broker>> {
    let broker: Arc<dyn Broker> = Arc::new(HttpBroker::new(&config.url));
    tracing::info!(url = %config.url, "connecting to broker");
    tokio::select! {
        _ = shutdown.recv() => None,
        _ = connect_with_retry(broker.as_ref(), config.retry_delay()) => Some(broker),
    }
}

pub fn load_metadata(config: &PipelineConfig) -> Result<VariantMetadata> {
    let path = &config.dataset.metadata_path;
    let metadata = VariantMetadata::load(path)
        .with_context(|| format!("failed to load variant metadata from {}", path.display()))?;
    if metadata.is_empty() {
        tracing::warn!(path = %path.display(), "variant metadata is empty");
    }
    Ok(metadata)
}

pub fn producer_settings(config: &PipelineConfig) -> ProducerSettings {
    ProducerSettings {
        period: config.dataset.period,
        chunker: Chunker::new(
            config.dataset.consumers(),
            config.dataset.max_chunk_records(),
        ),
        publish_rate: config.producer.publish_rate,
        publish_burst: config.producer.publish_burst,
    }
}

pub fn worker_settings(config: &PipelineConfig, name: String) -> WorkerSettings {
    WorkerSettings {
        name,
        prefetch: config.worker.prefetch.max(1),
        receive_wait: config.broker.receive_wait(),
    }
}

pub fn collector_settings(config: &PipelineConfig) -> CollectorSettings {
    let stall = config.collector.stall_warning_secs;
    CollectorSettings {
        receive_wait: config.broker.receive_wait(),
        stall_warning: (stall > 0).then(|| std::time::Duration::from_secs(stall)),
        stop_broker: config.collector.stop_broker,
    }
}
