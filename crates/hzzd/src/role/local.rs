//! `hzzd local`: every role in one process over an in-memory broker.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;

use hzz_core::config::PipelineConfig;
use hzz_services::{
    declare_pipeline_queues, Broker, Collector, FourLeptonSelection, HistogramExporter,
    JsonDirectorySource, LuminosityNormalization, MemoryBroker, NormalizationTable, Producer,
    Transformer, Worker,
};

pub async fn run(config: &PipelineConfig) -> Result<()> {
    let shutdown_tx = super::shutdown_channel();
    let mut shutdown = shutdown_tx.subscribe();

    let metadata = super::load_metadata(config)?;
    let normalization: Arc<dyn NormalizationTable> = Arc::new(LuminosityNormalization::new(
        metadata.clone(),
        config.dataset.period,
    ));
    let transformer: Arc<dyn Transformer> = Arc::new(FourLeptonSelection);
    let source = Arc::new(JsonDirectorySource::new(
        &config.dataset.root,
        Arc::new(metadata),
    ));

    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    declare_pipeline_queues(broker.as_ref())
        .await
        .context("failed to declare queues")?;

    let exporter = HistogramExporter::new(
        &config.collector.output_dir,
        config.collector.histogram,
        config.catalog.clone(),
    );
    let mut collector_settings = super::collector_settings(config);
    // Workers are stopped through the local channel once the collector is done.
    collector_settings.stop_broker = false;
    let collector = tokio::spawn(
        Collector::new(broker.clone(), Arc::new(exporter), collector_settings)
            .run(shutdown_tx.subscribe()),
    );

    let consumers = config.dataset.consumers().get();
    let mut workers = JoinSet::new();
    for i in 0..consumers {
        let worker = Worker::new(
            broker.clone(),
            transformer.clone(),
            normalization.clone(),
            super::worker_settings(config, format!("worker-{i}")),
        );
        workers.spawn(worker.run(shutdown_tx.subscribe()));
    }
    tracing::info!(consumers, period = %config.dataset.period, "local run starting");

    let producer = Producer::new(
        broker,
        source,
        config.catalog.clone(),
        super::producer_settings(config),
    );
    let produced = tokio::select! {
        _ = shutdown.recv() => None,
        r = producer.run() => Some(r),
    };
    if let Some(Err(e)) = produced {
        let _ = shutdown_tx.send(());
        return Err(e).context("production failed");
    }

    let report = collector
        .await
        .context("collector task panicked")?
        .context("collector failed")?;
    let _ = shutdown_tx.send(());

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(r)) => tracing::info!(
                processed = r.processed,
                dead_lettered = r.dead_lettered,
                stop = ?r.stop,
                "worker stopped"
            ),
            Ok(Err(e)) => tracing::warn!(error = %e, "worker failed"),
            Err(e) => tracing::warn!(error = %e, "worker task panicked"),
        }
    }

    super::collect::print_report(&report);
    Ok(())
}
