//! Collector: counts results in, detects completion, runs the shutdown
//! cascade.
//!
//! A single event loop owns the [`AggregationState`]. Count queues are
//! listed ahead of result queues on every receive so announcements are
//! applied as soon as they exist, but nothing relies on that: the
//! completion predicate is evaluated after every message.
//!
//! When the simulated class completes:
//!
//!   1. finalize the table (one concatenated dataset per identifier)
//!   2. publish one shutdown message per observed result received
//!   3. export the artifact
//!   4. close the channel, and terminate the broker if configured to
//!
//! Steps 2 and 4 run even when finalization or export fails, so workers are
//! never left waiting on a collector that has already given up.
//!
//! All state is in memory. A collector that dies mid-run takes its partial
//! aggregation with it; the run must be produced again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::broadcast;

use hzz_core::wire::{self, queues, DataClass, ResultEnvelope};

use crate::aggregation::{AggregationState, CompletionCounter, FinalizedTable, ResultOutcome};
use crate::broker::{Broker, BrokerError, ChannelId, Delivery};
use crate::error::PipelineError;
use crate::histogram::ArtifactExporter;

const CONSUMED: [&str; 5] = [
    queues::CHUNKS,
    queues::MC_CHUNKS,
    queues::TIME,
    queues::RESULT,
    queues::MC_RESULT,
];

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub receive_wait: Duration,
    /// Warn when nothing arrives for this long.
    pub stall_warning: Option<Duration>,
    /// Terminate the broker once the run is exported.
    pub stop_broker: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierSummary {
    pub identifier: String,
    pub class: DataClass,
    pub chunks: usize,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorReport {
    pub observed: CompletionCounter,
    pub simulated: CompletionCounter,
    pub identifiers: Vec<IdentifierSummary>,
    pub shutdown_signals: u64,
    pub duplicates: u64,
    pub dead_lettered: u64,
    pub artifact: Option<PathBuf>,
    /// Stopped by a local signal before the run completed.
    pub interrupted: bool,
}

#[derive(Debug, Default)]
struct Tally {
    duplicates: u64,
    dead_lettered: u64,
    run_started: Option<f64>,
}

pub struct Collector {
    broker: Arc<dyn Broker>,
    exporter: Arc<dyn ArtifactExporter>,
    settings: CollectorSettings,
    state: AggregationState,
    tally: Tally,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Collector {
    pub fn new(
        broker: Arc<dyn Broker>,
        exporter: Arc<dyn ArtifactExporter>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            broker,
            exporter,
            settings,
            state: AggregationState::new(),
            tally: Tally::default(),
        }
    }

    pub fn state(&self) -> &AggregationState {
        &self.state
    }

    pub async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<CollectorReport, PipelineError> {
        let channel = self.broker.open_channel(1).await?;
        tracing::info!(channel, "collector started");

        let mut last_event = Instant::now();
        let mut stall_reported = false;
        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::warn!(
                        observed = self.state.counter(DataClass::Observed).received(),
                        simulated = self.state.counter(DataClass::Simulated).received(),
                        "collector interrupted; partial aggregation discarded"
                    );
                    self.close(channel).await;
                    return Ok(self.report(None, 0, None, true));
                }
                r = self.broker.receive(channel, &CONSUMED, self.settings.receive_wait) => r,
            };
            let delivery = match received? {
                Some(d) => d,
                None => {
                    self.check_stall(last_event, &mut stall_reported);
                    continue;
                }
            };
            last_event = Instant::now();
            stall_reported = false;

            match self.handle(channel, &delivery).await? {
                Some(DataClass::Observed) => {
                    tracing::info!(
                        received = self.state.counter(DataClass::Observed).received(),
                        "observed class complete"
                    );
                }
                Some(DataClass::Simulated) => break,
                None => {}
            }
        }

        self.finish(channel).await
    }

    /// Apply one delivery and settle it. Returns the class it completed.
    async fn handle(
        &mut self,
        channel: ChannelId,
        delivery: &Delivery,
    ) -> Result<Option<DataClass>, PipelineError> {
        match self.apply(delivery) {
            Ok(completed) => {
                self.broker.ack(channel, delivery.tag).await?;
                Ok(completed)
            }
            Err(e) => {
                tracing::warn!(queue = %delivery.queue, error = %e, "message rejected");
                self.broker.nack(channel, delivery.tag, false).await?;
                self.tally.dead_lettered += 1;
                Ok(None)
            }
        }
    }

    fn apply(&mut self, delivery: &Delivery) -> Result<Option<DataClass>, PipelineError> {
        let queue = delivery.queue.as_str();
        let body = &delivery.body;

        if let Some(class) = DataClass::from_count_queue(queue) {
            let expected = wire::decode_count(body)?;
            tracing::info!(class = %class, expected, "count announcement received");
            return Ok(self.state.on_count(class, expected));
        }

        if let Some(class) = DataClass::from_result_queue(queue) {
            let result = ResultEnvelope::decode(class, body)?;
            let identifier = result.identifier.clone();
            return Ok(match self.state.on_result(class, result) {
                ResultOutcome::Accepted { completed } => {
                    let counter = self.state.counter(class);
                    tracing::debug!(
                        class = %class,
                        identifier = %identifier,
                        received = counter.received(),
                        expected = ?counter.expected(),
                        "result recorded"
                    );
                    completed
                }
                ResultOutcome::Duplicate => {
                    self.tally.duplicates += 1;
                    tracing::info!(identifier = %identifier, "duplicate result ignored");
                    None
                }
                ResultOutcome::Late => {
                    tracing::warn!(identifier = %identifier, "result after finalization ignored");
                    None
                }
                ResultOutcome::Incompatible(e) => {
                    return Err(PipelineError::MalformedPayload(format!(
                        "result for {identifier:?} does not match earlier results: {e}"
                    )));
                }
            });
        }

        if queue == queues::TIME {
            let started = wire::decode_run_start(body)?;
            self.state.on_control();
            self.tally.run_started = Some(started);
            tracing::info!(
                elapsed_secs = now_secs() - started,
                "run start received"
            );
            return Ok(None);
        }

        tracing::warn!(queue, "message from unexpected queue");
        self.state.on_control();
        Ok(None)
    }

    fn check_stall(&self, last_event: Instant, reported: &mut bool) {
        let Some(limit) = self.settings.stall_warning else {
            return;
        };
        let idle = last_event.elapsed();
        if *reported || idle < limit {
            return;
        }
        let observed = self.state.counter(DataClass::Observed);
        let simulated = self.state.counter(DataClass::Simulated);
        tracing::warn!(
            idle_secs = idle.as_secs(),
            observed_received = observed.received(),
            observed_expected = ?observed.expected(),
            simulated_received = simulated.received(),
            simulated_expected = ?simulated.expected(),
            "no messages; run may be stalled"
        );
        *reported = true;
    }

    async fn finish(mut self, channel: ChannelId) -> Result<CollectorReport, PipelineError> {
        let finalized = self.state.finalize();

        let observed = *self.state.counter(DataClass::Observed);
        if !observed.is_complete() {
            tracing::warn!(
                received = observed.received(),
                expected = ?observed.expected(),
                "observed class incomplete at finalization"
            );
        }
        let signals = observed.received();
        let broadcast = self.broadcast_shutdown(signals).await;

        let exported = finalized.map_err(PipelineError::from).and_then(|table| {
            let artifact = self.exporter.export(&table)?;
            Ok((table, artifact))
        });
        self.state.mark_shutdown();
        self.close(channel).await;

        broadcast?;
        let (table, artifact) = exported.inspect_err(|e| {
            tracing::error!(error = %e, "run complete but no artifact written");
        })?;

        if let Some(started) = self.tally.run_started {
            tracing::info!(elapsed_secs = now_secs() - started, "run complete");
        } else {
            tracing::info!("run complete");
        }

        if self.settings.stop_broker {
            match self.broker.terminate().await {
                Ok(()) | Err(BrokerError::Closed) => tracing::info!("broker stop requested"),
                Err(e) => tracing::warn!(error = %e, "failed to stop broker"),
            }
        }
        Ok(self.report(Some(&table), signals, artifact, false))
    }

    async fn broadcast_shutdown(&self, signals: u64) -> Result<(), BrokerError> {
        for _ in 0..signals {
            self.broker
                .publish(queues::SHUTDOWN, Bytes::from(wire::encode_shutdown()))
                .await?;
        }
        tracing::info!(signals, "shutdown broadcast");
        Ok(())
    }

    async fn close(&self, channel: ChannelId) {
        if let Err(e) = self.broker.close_channel(channel).await {
            tracing::debug!(error = %e, "channel close failed");
        }
    }

    fn report(
        &self,
        table: Option<&FinalizedTable>,
        shutdown_signals: u64,
        artifact: Option<PathBuf>,
        interrupted: bool,
    ) -> CollectorReport {
        let identifiers = table
            .map(|t| {
                t.iter()
                    .map(|(id, e)| IdentifierSummary {
                        identifier: id.to_string(),
                        class: e.class,
                        chunks: e.chunks,
                        records: e.records.len(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        CollectorReport {
            observed: *self.state.counter(DataClass::Observed),
            simulated: *self.state.counter(DataClass::Simulated),
            identifiers,
            shutdown_signals,
            duplicates: self.tally.duplicates,
            dead_lettered: self.tally.dead_lettered,
            artifact,
            interrupted,
        }
    }
}
