//! hzz-services: pipeline roles and the broker they talk through.

pub mod aggregation;
pub mod broker;
pub mod broker_api;
pub mod chunker;
pub mod collector;
pub mod error;
pub mod histogram;
pub mod http_broker;
pub mod memory_broker;
pub mod producer;
pub mod qos;
pub mod source;
pub mod transform;
pub mod weights;
pub mod worker;

pub use aggregation::{AggregationState, CompletionCounter, FinalizedTable, Phase, ResultOutcome};
pub use broker::{
    connect_with_retry, declare_pipeline_queues, Broker, BrokerError, ChannelId, Delivery,
    DeliveryTag, QueueStats,
};
pub use chunker::Chunker;
pub use collector::{Collector, CollectorReport, CollectorSettings};
pub use error::PipelineError;
pub use histogram::{ArtifactExporter, ExportError, HistogramExporter, MassSpectrum};
pub use http_broker::HttpBroker;
pub use memory_broker::{lease_loop, Journal, JournalEntry, MemoryBroker, MessageId};
pub use producer::{Producer, ProducerSettings, ProductionReport};
pub use qos::TokenBucket;
pub use source::{DatasetRef, DatasetSource, EventTable, JsonDirectorySource, MemorySource, SourceError};
pub use transform::{FourLeptonSelection, Identity, Transformer};
pub use weights::{LuminosityNormalization, NormalizationTable};
pub use worker::{StopReason, Worker, WorkerReport, WorkerSettings};
