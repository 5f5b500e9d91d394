//! Producer: chunks every dataset of a run onto the task queues.
//!
//! Publication order on the broker:
//!
//!   task_queue      observed chunks
//!   chunks_queue    observed count
//!   mc_task_queue   simulated chunks, group by group, variant by variant
//!   mc_chunks_queue simulated count
//!   time_queue      run-start timestamp
//!
//! Every dataset is opened before the first publish, so a missing sample
//! aborts the run with nothing on the queues.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use hzz_core::catalog::{Period, SampleCatalog};
use hzz_core::wire::{self, queues, DataClass, TaskEnvelope};

use crate::broker::{declare_pipeline_queues, Broker};
use crate::chunker::Chunker;
use crate::error::PipelineError;
use crate::qos::TokenBucket;
use crate::source::{DatasetRef, DatasetSource, EventTable, SourceError};

#[derive(Debug, Clone, Copy)]
pub struct ProducerSettings {
    pub period: Period,
    pub chunker: Chunker,
    /// Task publishes per second. 0 = unlimited.
    pub publish_rate: u32,
    pub publish_burst: u32,
}

/// What one production run put on the queues.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionReport {
    pub run_id: String,
    pub observed_chunks: u64,
    pub simulated_chunks: u64,
    /// Chunks published per dataset, in publish order.
    pub datasets: Vec<(DatasetRef, u64)>,
}

impl ProductionReport {
    pub fn chunks(&self, class: DataClass) -> u64 {
        match class {
            DataClass::Observed => self.observed_chunks,
            DataClass::Simulated => self.simulated_chunks,
        }
    }
}

pub struct Producer {
    broker: Arc<dyn Broker>,
    source: Arc<dyn DatasetSource>,
    catalog: SampleCatalog,
    settings: ProducerSettings,
    run_id: String,
}

fn unix_secs(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Short random-enough id for one run: BLAKE3 of the start time and pid.
fn new_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut h = blake3::Hasher::new();
    h.update(&nanos.to_le_bytes());
    h.update(&std::process::id().to_le_bytes());
    h.finalize().to_hex()[..16].to_string()
}

impl Producer {
    pub fn new(
        broker: Arc<dyn Broker>,
        source: Arc<dyn DatasetSource>,
        catalog: SampleCatalog,
        settings: ProducerSettings,
    ) -> Self {
        Self {
            broker,
            source,
            catalog,
            settings,
            run_id: new_run_id(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Every dataset this run publishes, in publish order.
    pub fn datasets(&self) -> Result<Vec<DatasetRef>, SourceError> {
        let period = self.settings.period;
        let observed =
            self.catalog
                .observed_sample(period)
                .ok_or_else(|| SourceError::Unavailable {
                    dataset: format!("observed/period {period}"),
                    reason: "catalog has no observed sample for this period".to_string(),
                })?;
        let mut all = vec![DatasetRef::observed(observed)];
        all.extend(
            self.catalog
                .simulated_datasets()
                .map(|(group, variant)| DatasetRef::simulated(group, variant)),
        );
        Ok(all)
    }

    pub async fn run(self) -> Result<ProductionReport, PipelineError> {
        let started = SystemTime::now();
        declare_pipeline_queues(self.broker.as_ref()).await?;

        let opened: Vec<(DatasetRef, Arc<dyn EventTable>)> = self
            .datasets()?
            .into_iter()
            .map(|d| {
                let table = self.source.open(&d)?;
                Ok::<_, SourceError>((d, table))
            })
            .collect::<Result<_, SourceError>>()?;
        tracing::info!(
            run_id = %self.run_id,
            period = %self.settings.period,
            datasets = opened.len(),
            "all datasets opened"
        );

        let mut bucket = TokenBucket::new(self.settings.publish_rate, self.settings.publish_burst);
        let mut report = ProductionReport {
            run_id: self.run_id.clone(),
            observed_chunks: 0,
            simulated_chunks: 0,
            datasets: Vec::with_capacity(opened.len()),
        };

        for class in DataClass::ALL {
            let mut published = 0u64;
            for (dataset, table) in opened.iter().filter(|(d, _)| d.class == class) {
                let n = self
                    .publish_dataset(dataset, table.as_ref(), &mut bucket)
                    .await?;
                report.datasets.push((dataset.clone(), n));
                published += n;
            }
            self.broker
                .publish(class.count_queue(), Bytes::from(wire::encode_count(published)))
                .await?;
            match class {
                DataClass::Observed => report.observed_chunks = published,
                DataClass::Simulated => report.simulated_chunks = published,
            }
            tracing::info!(class = %class, chunks = published, "count announced");
        }

        let start = wire::encode_run_start(unix_secs(started))?;
        self.broker.publish(queues::TIME, Bytes::from(start)).await?;
        tracing::info!(
            run_id = %report.run_id,
            observed = report.observed_chunks,
            simulated = report.simulated_chunks,
            "production finished"
        );
        Ok(report)
    }

    async fn publish_dataset(
        &self,
        dataset: &DatasetRef,
        table: &dyn EventTable,
        bucket: &mut TokenBucket,
    ) -> Result<u64, PipelineError> {
        let ranges = self.settings.chunker.ranges(table.num_entries());
        let mut count = 0u64;
        for (index, range) in ranges.into_iter().enumerate() {
            let data = table.read(range)?;
            let envelope = match dataset.class {
                DataClass::Observed => TaskEnvelope::observed(data),
                DataClass::Simulated => {
                    TaskEnvelope::simulated(&dataset.identifier, &dataset.sample, data)
                }
            };
            let task = wire::task_id(
                &self.run_id,
                dataset.class,
                &dataset.identifier,
                dataset.variant(),
                index as u64,
            );
            let body = envelope.with_task(task).to_bytes()?;
            bucket.acquire().await;
            self.broker
                .publish(dataset.class.task_queue(), Bytes::from(body))
                .await?;
            count += 1;
        }
        tracing::debug!(dataset = %dataset, chunks = count, "dataset published");
        Ok(count)
    }
}
