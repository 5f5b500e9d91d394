//! End-to-end pipeline tests.
//!
//! Every test runs the real roles (producer, workers, collector) as tasks
//! in this process, wired through an in-memory broker or an HTTP broker
//! daemon bound to an ephemeral port. No external services are needed:
//!
//!   cargo test --test integration

mod failures;
mod http;
mod scenarios;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use hzz_core::catalog::{Period, SampleCatalog, SampleGroup};
use hzz_core::records::{Column, EventChunk};
use hzz_core::wire::queues;
use hzz_services::weights::WEIGHT_VARIABLES;
use hzz_services::{
    ArtifactExporter, Broker, Chunker, Collector, CollectorSettings, ExportError, FinalizedTable,
    Identity, MemorySource, NormalizationTable, PipelineError, Producer, ProducerSettings,
    ProductionReport, QueueStats, Worker, WorkerReport, WorkerSettings,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_millis(20);
pub const DEADLINE: Duration = Duration::from_secs(10);

/// `n` records: an `x` column counting from 0 plus unit weight columns.
pub fn records(n: usize) -> EventChunk {
    let mut chunk =
        EventChunk::from_columns([("x", Column::Float((0..n).map(|i| i as f64).collect()))])
            .unwrap();
    for name in WEIGHT_VARIABLES {
        chunk.insert(name, Column::Float(vec![1.0; n])).unwrap();
    }
    chunk
}

/// `n` copies of one e+e-μ+μ- event with a four-lepton mass of 124 GeV,
/// plus unit weight columns.
pub fn lepton_events(n: usize) -> EventChunk {
    use std::f64::consts::{FRAC_PI_2, PI};
    let per_event = |v: [f64; 4]| Column::FloatList(vec![v.to_vec(); n]);
    let mut chunk = EventChunk::from_columns([
        ("lep_type", Column::IntList(vec![vec![11, 11, 13, 13]; n])),
        ("lep_charge", Column::IntList(vec![vec![1, -1, 1, -1]; n])),
        ("lep_pt", per_event([30_000.0; 4])),
        ("lep_eta", per_event([0.0; 4])),
        ("lep_phi", per_event([0.0, PI, FRAC_PI_2, -FRAC_PI_2])),
        ("lep_E", per_event([31_000.0; 4])),
    ])
    .unwrap();
    for name in WEIGHT_VARIABLES {
        chunk.insert(name, Column::Float(vec![1.0; n])).unwrap();
    }
    chunk
}

fn group(name: &str, variants: &[&str]) -> SampleGroup {
    SampleGroup {
        name: name.to_string(),
        color: None,
        variants: variants.iter().map(|v| v.to_string()).collect(),
    }
}

/// Observed sample `data_A`; simulated groups as given.
pub fn catalog(simulated: &[(&str, &[&str])]) -> SampleCatalog {
    SampleCatalog {
        observed: group("data", &["data_A", "data_B", "data_C", "data_D"]),
        simulated: simulated.iter().map(|(g, v)| group(g, v)).collect(),
    }
}

pub fn source(samples: &[(&str, usize)]) -> MemorySource {
    samples
        .iter()
        .fold(MemorySource::new(), |s, (name, n)| s.with(*name, records(*n)))
}

/// Unit normalization for every variant in `catalog`.
pub fn unit_norms(catalog: &SampleCatalog) -> Arc<dyn NormalizationTable> {
    let table: HashMap<String, f64> = catalog
        .simulated_datasets()
        .map(|(_, variant)| (variant.to_string(), 1.0))
        .collect();
    Arc::new(table)
}

pub fn producer_settings(consumers: usize) -> ProducerSettings {
    ProducerSettings {
        period: Period::A,
        chunker: Chunker::new(consumers.try_into().unwrap(), None),
        publish_rate: 0,
        publish_burst: 1,
    }
}

pub fn collector_settings() -> CollectorSettings {
    CollectorSettings {
        receive_wait: WAIT,
        stall_warning: None,
        stop_broker: false,
    }
}

pub fn worker(
    broker: Arc<dyn Broker>,
    norms: Arc<dyn NormalizationTable>,
    name: &str,
) -> Worker {
    Worker::new(
        broker,
        Arc::new(Identity),
        norms,
        WorkerSettings {
            name: name.to_string(),
            prefetch: 1,
            receive_wait: WAIT,
        },
    )
}

pub fn shutdown() -> broadcast::Sender<()> {
    broadcast::channel(4).0
}

/// Remembers the identifiers of every table it was asked to export.
#[derive(Default)]
pub struct Recorder {
    pub exported: Mutex<Vec<Vec<String>>>,
}

impl ArtifactExporter for Recorder {
    fn export(&self, table: &FinalizedTable) -> Result<Option<PathBuf>, ExportError> {
        self.exported
            .lock()
            .unwrap()
            .push(table.identifiers().map(str::to_string).collect());
        Ok(None)
    }
}

pub fn collector(broker: Arc<dyn Broker>, exporter: Arc<Recorder>) -> Collector {
    Collector::new(broker, exporter, collector_settings())
}

pub async fn stats(broker: &dyn Broker, queue: &str) -> QueueStats {
    broker
        .queue_stats()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.name == queue)
        .unwrap_or_else(|| QueueStats {
            name: queue.to_string(),
            ..QueueStats::default()
        })
}

/// Poll `check` until it holds or `DEADLINE` passes.
pub async fn wait_until<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < DEADLINE {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out waiting for {what}")
}

/// Await `fut`, failing the test instead of hanging.
pub async fn within<T>(fut: impl std::future::Future<Output = T>) -> Result<T> {
    tokio::time::timeout(DEADLINE, fut)
        .await
        .context("pipeline did not finish in time")
}

/// Spawn `n` workers, run the producer, and wait until every task has a
/// result waiting. The collector then sees the whole run in queue order.
pub async fn produce_and_work(
    broker: Arc<dyn Broker>,
    source: MemorySource,
    catalog: &SampleCatalog,
    n: usize,
    stop: &broadcast::Sender<()>,
) -> (ProductionReport, JoinSet<Result<WorkerReport, PipelineError>>) {
    let mut workers = JoinSet::new();
    for i in 0..n {
        workers.spawn(
            worker(broker.clone(), unit_norms(catalog), &format!("w{i}")).run(stop.subscribe()),
        );
    }
    let report = Producer::new(
        broker.clone(),
        Arc::new(source),
        catalog.clone(),
        producer_settings(n),
    )
    .run()
    .await
    .unwrap();

    let (observed, simulated) = (report.observed_chunks as usize, report.simulated_chunks as usize);
    wait_until("all results", || {
        let broker = broker.clone();
        async move {
            stats(broker.as_ref(), queues::RESULT).await.ready == observed
                && stats(broker.as_ref(), queues::MC_RESULT).await.ready == simulated
        }
    })
    .await
    .unwrap();
    (report, workers)
}
