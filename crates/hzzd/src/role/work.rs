//! `hzzd work`: one worker process.

use std::sync::Arc;

use anyhow::{Context, Result};

use hzz_core::config::PipelineConfig;
use hzz_services::{FourLeptonSelection, LuminosityNormalization, Worker};

pub async fn run(config: &PipelineConfig) -> Result<()> {
    let shutdown_tx = super::shutdown_channel();
    let mut shutdown = shutdown_tx.subscribe();

    let normalization = LuminosityNormalization::new(
        super::load_metadata(config)?,
        config.dataset.period,
    );
    let Some(broker) = super::connect(&config.broker, &mut shutdown).await else {
        return Ok(());
    };

    let name = format!("worker-{}", std::process::id());
    let worker = Worker::new(
        broker,
        Arc::new(FourLeptonSelection),
        Arc::new(normalization),
        super::worker_settings(config, name.clone()),
    );
    let report = worker
        .run(shutdown_tx.subscribe())
        .await
        .context("worker failed")?;
    tracing::info!(
        worker = %name,
        processed = report.processed,
        dead_lettered = report.dead_lettered,
        stop = ?report.stop,
        "worker stopped"
    );
    Ok(())
}
