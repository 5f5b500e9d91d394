//! Dataset sources.
//!
//! A source resolves a [`DatasetRef`] to an [`EventTable`]: something that
//! knows its record count and can read any record range as an
//! [`EventChunk`].
//!
//! On disk, [`JsonDirectorySource`] expects the sample layout
//!
//!   <root>/Data/<sample>.4lep.json
//!   <root>/MC/mc_<dsid>.<variant>.4lep.json
//!
//! each file holding one columnar chunk.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hzz_core::catalog::VariantMetadata;
use hzz_core::records::{EventChunk, RecordError};
use hzz_core::wire::{DataClass, OBSERVED_IDENTIFIER};

/// One dataset of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub class: DataClass,
    /// Aggregation key: "data", or the simulated group name.
    pub identifier: String,
    /// Observed sample name (e.g. "data_A") or simulated variant.
    pub sample: String,
}

impl DatasetRef {
    pub fn observed(sample: impl Into<String>) -> Self {
        Self {
            class: DataClass::Observed,
            identifier: OBSERVED_IDENTIFIER.to_string(),
            sample: sample.into(),
        }
    }

    pub fn simulated(group: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            class: DataClass::Simulated,
            identifier: group.into(),
            sample: variant.into(),
        }
    }

    /// Variant name, for simulated datasets.
    pub fn variant(&self) -> Option<&str> {
        match self.class {
            DataClass::Observed => None,
            DataClass::Simulated => Some(&self.sample),
        }
    }
}

impl std::fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.class, self.sample)
    }
}

/// A readable dataset.
pub trait EventTable: Send + Sync {
    fn num_entries(&self) -> usize;

    fn read(&self, range: Range<usize>) -> Result<EventChunk, SourceError>;
}

impl EventTable for EventChunk {
    fn num_entries(&self) -> usize {
        self.len()
    }

    fn read(&self, range: Range<usize>) -> Result<EventChunk, SourceError> {
        Ok(self.slice(range)?)
    }
}

pub trait DatasetSource: Send + Sync {
    fn open(&self, dataset: &DatasetRef) -> Result<Arc<dyn EventTable>, SourceError>;
}

// ── JSON directory source ─────────────────────────────────────────────────────

pub struct JsonDirectorySource {
    root: PathBuf,
    metadata: Arc<VariantMetadata>,
}

impl JsonDirectorySource {
    pub fn new(root: impl Into<PathBuf>, metadata: Arc<VariantMetadata>) -> Self {
        Self {
            root: root.into(),
            metadata,
        }
    }

    /// File holding `dataset`. Simulated paths need the variant's dataset id.
    pub fn path_for(&self, dataset: &DatasetRef) -> Result<PathBuf, SourceError> {
        match dataset.class {
            DataClass::Observed => Ok(self
                .root
                .join("Data")
                .join(format!("{}.4lep.json", dataset.sample))),
            DataClass::Simulated => {
                let info = self.metadata.get(&dataset.sample).ok_or_else(|| {
                    SourceError::Unavailable {
                        dataset: dataset.to_string(),
                        reason: "variant has no metadata entry".to_string(),
                    }
                })?;
                Ok(self
                    .root
                    .join("MC")
                    .join(format!("mc_{}.{}.4lep.json", info.dsid, dataset.sample)))
            }
        }
    }
}

fn read_chunk(dataset: &DatasetRef, path: &Path) -> Result<EventChunk, SourceError> {
    let file = File::open(path).map_err(|e| SourceError::Unavailable {
        dataset: dataset.to_string(),
        reason: format!("{}: {e}", path.display()),
    })?;
    let chunk: EventChunk =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| SourceError::Unreadable {
            dataset: dataset.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
    chunk.validate()?;
    Ok(chunk)
}

impl DatasetSource for JsonDirectorySource {
    fn open(&self, dataset: &DatasetRef) -> Result<Arc<dyn EventTable>, SourceError> {
        let path = self.path_for(dataset)?;
        let chunk = read_chunk(dataset, &path)?;
        tracing::debug!(
            dataset = %dataset,
            path = %path.display(),
            records = chunk.len(),
            "dataset opened"
        );
        Ok(Arc::new(chunk))
    }
}

// ── In-memory source ──────────────────────────────────────────────────────────

/// Datasets held in memory, keyed by sample name.
#[derive(Clone, Default)]
pub struct MemorySource {
    datasets: HashMap<String, Arc<EventChunk>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sample: impl Into<String>, chunk: EventChunk) {
        self.datasets.insert(sample.into(), Arc::new(chunk));
    }

    pub fn with(mut self, sample: impl Into<String>, chunk: EventChunk) -> Self {
        self.insert(sample, chunk);
        self
    }
}

impl DatasetSource for MemorySource {
    fn open(&self, dataset: &DatasetRef) -> Result<Arc<dyn EventTable>, SourceError> {
        let chunk = self
            .datasets
            .get(&dataset.sample)
            .ok_or_else(|| SourceError::Unavailable {
                dataset: dataset.to_string(),
                reason: "no such sample".to_string(),
            })?;
        Ok(chunk.clone())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("dataset {dataset} unavailable: {reason}")]
    Unavailable { dataset: String, reason: String },

    #[error("dataset {dataset} unreadable: {reason}")]
    Unreadable { dataset: String, reason: String },

    #[error(transparent)]
    Records(#[from] RecordError),
}
