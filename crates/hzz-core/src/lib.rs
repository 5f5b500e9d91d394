//! hzz-core: shared types, wire format, catalog and configuration.
//! All other pipeline crates depend on this one.

pub mod catalog;
pub mod config;
pub mod records;
pub mod wire;

pub use catalog::{Period, SampleCatalog, SampleGroup, VariantInfo, VariantMetadata};
pub use config::PipelineConfig;
pub use records::{Column, EventChunk, RecordError};
pub use wire::{DataClass, ResultEnvelope, TaskEnvelope, WireError};
