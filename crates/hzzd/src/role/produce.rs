//! `hzzd produce`: publish one run's tasks.

use std::sync::Arc;

use anyhow::{Context, Result};

use hzz_core::config::PipelineConfig;
use hzz_services::{JsonDirectorySource, Producer};

pub async fn run(config: &PipelineConfig) -> Result<()> {
    let shutdown_tx = super::shutdown_channel();
    let mut shutdown = shutdown_tx.subscribe();

    let metadata = Arc::new(super::load_metadata(config)?);
    let source = Arc::new(JsonDirectorySource::new(&config.dataset.root, metadata));

    let Some(broker) = super::connect(&config.broker, &mut shutdown).await else {
        return Ok(());
    };

    let producer = Producer::new(
        broker,
        source,
        config.catalog.clone(),
        super::producer_settings(config),
    );
    tracing::info!(
        run_id = producer.run_id(),
        period = %config.dataset.period,
        consumers = config.dataset.consumers().get(),
        "producer starting"
    );

    let report = tokio::select! {
        _ = shutdown.recv() => {
            tracing::warn!("producer interrupted; the run is incomplete");
            return Ok(());
        }
        r = producer.run() => r.context("production failed")?,
    };
    for (dataset, chunks) in &report.datasets {
        tracing::info!(dataset = %dataset, chunks, "dataset published");
    }
    println!(
        "run {}: {} observed, {} simulated chunks",
        report.run_id, report.observed_chunks, report.simulated_chunks
    );
    Ok(())
}
