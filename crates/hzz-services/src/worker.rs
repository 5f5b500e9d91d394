//! Worker: consumes task envelopes, transforms them, publishes results.
//!
//! One channel per worker with a small prefetch. The shutdown queue is
//! listed first on every receive, so a pending shutdown always wins over
//! queued tasks. A result is published before its task is acked: a crash in
//! between yields a duplicate result, never a lost one.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use hzz_core::wire::{self, queues, DataClass, ResultEnvelope, TaskEnvelope};

use crate::broker::{Broker, BrokerError, ChannelId, Delivery};
use crate::error::PipelineError;
use crate::transform::Transformer;
use crate::weights::{apply_weights, NormalizationTable};

const CONSUMED: [&str; 3] = [queues::SHUTDOWN, queues::TASK, queues::MC_TASK];

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Name used in logs.
    pub name: String,
    pub prefetch: u16,
    pub receive_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A message arrived on the shutdown queue.
    ShutdownMessage,
    /// The local process is shutting down.
    LocalSignal,
    /// The broker went away.
    BrokerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub dead_lettered: u64,
    pub stop: StopReason,
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    transformer: Arc<dyn Transformer>,
    normalization: Arc<dyn NormalizationTable>,
    settings: WorkerSettings,
}

/// Turn one task body into a result body.
pub fn process_task(
    class: DataClass,
    body: &[u8],
    transformer: &dyn Transformer,
    normalization: &dyn NormalizationTable,
) -> Result<Vec<u8>, PipelineError> {
    let task = TaskEnvelope::decode(class, body)?;
    let mut data = transformer.transform(task.data)?;
    if class == DataClass::Simulated {
        // decode() guarantees a variant on the simulated queue.
        let variant = task.variant.unwrap_or_default();
        let factor = normalization
            .normalization(&variant)
            .ok_or(PipelineError::MissingNormalization(variant))?;
        data = apply_weights(data, factor)
            .map_err(|e| PipelineError::MalformedPayload(e.to_string()))?;
    }
    let result = ResultEnvelope {
        identifier: task.identifier,
        task: task.task,
        data,
    };
    Ok(result.to_bytes()?)
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        transformer: Arc<dyn Transformer>,
        normalization: Arc<dyn NormalizationTable>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            broker,
            transformer,
            normalization,
            settings,
        }
    }

    /// Consume until a shutdown message, a local signal, or broker loss.
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<WorkerReport, PipelineError> {
        let name = self.settings.name.clone();
        let mut channel = self.broker.open_channel(self.settings.prefetch).await?;
        tracing::info!(worker = %name, channel, "worker started");

        let mut processed = 0u64;
        let mut dead_lettered = 0u64;
        let stop = loop {
            let received = tokio::select! {
                _ = shutdown.recv() => break StopReason::LocalSignal,
                r = self.broker.receive(channel, &CONSUMED, self.settings.receive_wait) => r,
            };
            let delivery = match received {
                Ok(Some(d)) => d,
                Ok(None) => continue,
                Err(BrokerError::Closed) => break StopReason::BrokerClosed,
                Err(BrokerError::UnknownChannel(_)) => {
                    channel = self.reopen(&name).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if delivery.queue == queues::SHUTDOWN {
                if !wire::is_shutdown(&delivery.body) {
                    tracing::warn!(worker = %name, "unexpected body on shutdown queue");
                }
                self.settle(&name, channel, delivery.tag, Settle::Ack).await?;
                break StopReason::ShutdownMessage;
            }

            match self.handle(&delivery).await {
                Ok(result) => {
                    let class = self.class_of(&delivery);
                    self.broker.publish(class.result_queue(), result).await?;
                    self.settle(&name, channel, delivery.tag, Settle::Ack).await?;
                    processed += 1;
                    tracing::debug!(
                        worker = %name,
                        class = %class,
                        redelivered = delivery.redelivered,
                        "task processed"
                    );
                }
                Err(e) if e.is_per_message() => {
                    tracing::warn!(
                        worker = %name,
                        queue = %delivery.queue,
                        error = %e,
                        "task rejected"
                    );
                    self.settle(&name, channel, delivery.tag, Settle::DeadLetter)
                        .await?;
                    dead_lettered += 1;
                }
                Err(e) => return Err(e),
            }
        };

        match self.broker.close_channel(channel).await {
            Ok(()) | Err(BrokerError::Closed) | Err(BrokerError::UnknownChannel(_)) => {}
            Err(e) => tracing::warn!(worker = %name, error = %e, "failed to close channel"),
        }
        tracing::info!(worker = %name, processed, dead_lettered, ?stop, "worker stopped");
        Ok(WorkerReport {
            processed,
            dead_lettered,
            stop,
        })
    }

    fn class_of(&self, delivery: &Delivery) -> DataClass {
        DataClass::from_task_queue(&delivery.queue).unwrap_or(DataClass::Observed)
    }

    async fn handle(&self, delivery: &Delivery) -> Result<Bytes, PipelineError> {
        let class = self.class_of(delivery);
        let body = delivery.body.clone();
        let transformer = self.transformer.clone();
        let normalization = self.normalization.clone();
        let result = tokio::task::spawn_blocking(move || {
            process_task(class, &body, transformer.as_ref(), normalization.as_ref())
        })
        .await
        .map_err(|e| PipelineError::MalformedPayload(format!("transform aborted: {e}")))??;
        Ok(Bytes::from(result))
    }

    /// Ack or dead-letter a delivery. A delivery on a channel the broker
    /// already dropped has been requeued; its result is a duplicate the
    /// collector ignores.
    async fn settle(
        &self,
        name: &str,
        channel: ChannelId,
        tag: u64,
        settle: Settle,
    ) -> Result<(), PipelineError> {
        let r = match settle {
            Settle::Ack => self.broker.ack(channel, tag).await,
            Settle::DeadLetter => self.broker.nack(channel, tag, false).await,
        };
        match r {
            Ok(()) => Ok(()),
            Err(e @ (BrokerError::UnknownChannel(_) | BrokerError::UnknownDelivery { .. })) => {
                tracing::warn!(worker = %name, error = %e, "delivery lost to lease expiry");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reopen(&self, name: &str) -> Result<ChannelId, PipelineError> {
        let channel = self.broker.open_channel(self.settings.prefetch).await?;
        tracing::warn!(worker = %name, channel, "channel expired, reopened");
        Ok(channel)
    }
}

#[derive(Debug, Clone, Copy)]
enum Settle {
    Ack,
    DeadLetter,
}
