//! `hzzd collect`: aggregate, stop the workers, export.

use std::sync::Arc;

use anyhow::{Context, Result};

use hzz_core::config::PipelineConfig;
use hzz_services::{Collector, CollectorReport, HistogramExporter};

pub async fn run(config: &PipelineConfig) -> Result<()> {
    let shutdown_tx = super::shutdown_channel();
    let mut shutdown = shutdown_tx.subscribe();

    let Some(broker) = super::connect(&config.broker, &mut shutdown).await else {
        return Ok(());
    };
    let exporter = HistogramExporter::new(
        &config.collector.output_dir,
        config.collector.histogram,
        config.catalog.clone(),
    );
    let collector = Collector::new(
        broker,
        Arc::new(exporter),
        super::collector_settings(config),
    );
    let report = collector
        .run(shutdown_tx.subscribe())
        .await
        .context("collector failed")?;
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &CollectorReport) {
    if report.interrupted {
        println!("interrupted before completion; nothing exported");
        return;
    }
    for id in &report.identifiers {
        println!(
            "{:<32} {:<9} {:>4} chunks {:>8} records",
            id.identifier,
            id.class.to_string(),
            id.chunks,
            id.records
        );
    }
    println!(
        "shutdown signals: {}  duplicates: {}  dead-lettered: {}",
        report.shutdown_signals, report.duplicates, report.dead_lettered
    );
    match &report.artifact {
        Some(path) => println!("artifact: {}", path.display()),
        None => println!("artifact: none"),
    }
}
