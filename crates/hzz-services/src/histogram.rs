//! Mass-spectrum artifact.
//!
//! The finalized table is binned into a four-lepton mass histogram:
//! observed counts with √N errors, one weighted series per simulated group
//! (stacked in catalog order), their sum and its statistical uncertainty
//! √Σw². The artifact is written as JSON, named by the wall-clock minute the
//! run finished.

use std::path::{Path, PathBuf};

use serde::Serialize;

use hzz_core::catalog::SampleCatalog;
use hzz_core::config::HistogramSettings;
use hzz_core::records::RecordError;
use hzz_core::wire::DataClass;

use crate::aggregation::FinalizedTable;
use crate::transform::MASS_COLUMN;
use crate::weights::TOTAL_WEIGHT_COLUMN;

/// `strftime` pattern of artifact file names.
pub const FILE_NAME_FORMAT: &str = "%d-%m-%Y %H-%M";

/// Headroom above the tallest observed bin, for the plot's y range.
const Y_HEADROOM: f64 = 1.6;

// ── Histogram ─────────────────────────────────────────────────────────────────

/// Fixed-width bins over `[min, max]`. The last bin includes its right edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    edges: Vec<f64>,
    sum: Vec<f64>,
    sumw2: Vec<f64>,
}

impl Histogram {
    pub fn new(settings: &HistogramSettings) -> Self {
        let bins = if settings.step_gev > 0.0 && settings.max_gev > settings.min_gev {
            ((settings.max_gev - settings.min_gev) / settings.step_gev).round() as usize
        } else {
            0
        };
        let edges = (0..=bins)
            .map(|i| settings.min_gev + i as f64 * settings.step_gev)
            .collect();
        Self {
            edges,
            sum: vec![0.0; bins],
            sumw2: vec![0.0; bins],
        }
    }

    pub fn bins(&self) -> usize {
        self.sum.len()
    }

    fn bin_of(&self, x: f64) -> Option<usize> {
        let (first, last) = (*self.edges.first()?, *self.edges.last()?);
        if self.bins() == 0 || !(first..=last).contains(&x) {
            return None;
        }
        let width = (last - first) / self.bins() as f64;
        Some((((x - first) / width) as usize).min(self.bins() - 1))
    }

    pub fn fill(&mut self, x: f64, weight: f64) {
        if let Some(i) = self.bin_of(x) {
            self.sum[i] += weight;
            self.sumw2[i] += weight * weight;
        }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn centres(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
    }

    pub fn counts(&self) -> &[f64] {
        &self.sum
    }

    /// √Σw² per bin (√N for unit weights).
    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|s| s.sqrt()).collect()
    }

    fn add(&mut self, other: &Histogram) {
        for (a, b) in self.sum.iter_mut().zip(&other.sum) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
    }
}

// ── Artifact ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedSeries {
    pub events: usize,
    pub counts: Vec<f64>,
    pub errors: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedSeries {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub events: usize,
    pub counts: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MassSpectrum {
    pub x_label: String,
    pub bin_edges: Vec<f64>,
    pub bin_centres: Vec<f64>,
    pub observed: Option<ObservedSeries>,
    /// In stacking order.
    pub simulated: Vec<SimulatedSeries>,
    pub simulated_total: Vec<f64>,
    pub simulated_stat_unc: Vec<f64>,
    pub y_max: f64,
}

impl MassSpectrum {
    pub fn build(
        table: &FinalizedTable,
        settings: &HistogramSettings,
        catalog: &SampleCatalog,
    ) -> Result<Self, RecordError> {
        let template = Histogram::new(settings);

        let mut observed = None;
        let mut observed_entries = table.of_class(DataClass::Observed).peekable();
        if observed_entries.peek().is_some() {
            let mut h = template.clone();
            let mut events = 0;
            for (_, entry) in observed_entries {
                for &m in entry.records.float(MASS_COLUMN)? {
                    h.fill(m, 1.0);
                }
                events += entry.records.len();
            }
            observed = Some(ObservedSeries {
                events,
                counts: h.counts().to_vec(),
                errors: h.errors(),
            });
        }

        // Catalog order first, then anything the catalog does not name.
        let mut order: Vec<&str> = catalog
            .simulated
            .iter()
            .map(|g| g.name.as_str())
            .filter(|name| table.get(name).is_some_and(|e| e.class == DataClass::Simulated))
            .collect();
        for (name, _) in table.of_class(DataClass::Simulated) {
            if !order.contains(&name) {
                order.push(name);
            }
        }

        let mut total = template.clone();
        let mut simulated = Vec::with_capacity(order.len());
        for name in order {
            let Some(entry) = table.get(name) else { continue };
            let mut h = template.clone();
            if !entry.records.is_empty() {
                let mass = entry.records.float(MASS_COLUMN)?;
                let weight = entry.records.float(TOTAL_WEIGHT_COLUMN)?;
                for (&m, &w) in mass.iter().zip(weight) {
                    h.fill(m, w);
                }
            }
            total.add(&h);
            simulated.push(SimulatedSeries {
                identifier: name.to_string(),
                color: catalog.group(name).and_then(|g| g.color.clone()),
                events: entry.records.len(),
                counts: h.counts().to_vec(),
            });
        }

        let tallest = observed
            .as_ref()
            .map(|o| o.counts.iter().copied().fold(0.0, f64::max))
            .unwrap_or(0.0);

        Ok(Self {
            x_label: "4-lepton invariant mass [GeV]".to_string(),
            bin_edges: template.edges().to_vec(),
            bin_centres: template.centres(),
            observed,
            simulated,
            simulated_total: total.counts().to_vec(),
            simulated_stat_unc: total.errors(),
            y_max: tallest * Y_HEADROOM,
        })
    }
}

// ── Export ────────────────────────────────────────────────────────────────────

/// Writes the run's artifact from the finalized table.
pub trait ArtifactExporter: Send + Sync {
    /// Returns where the artifact went, if anywhere.
    fn export(&self, table: &FinalizedTable) -> Result<Option<PathBuf>, ExportError>;
}

/// JSON mass spectrum in `output_dir`.
pub struct HistogramExporter {
    output_dir: PathBuf,
    settings: HistogramSettings,
    catalog: SampleCatalog,
}

impl HistogramExporter {
    pub fn new(output_dir: impl Into<PathBuf>, settings: HistogramSettings, catalog: SampleCatalog) -> Self {
        Self {
            output_dir: output_dir.into(),
            settings,
            catalog,
        }
    }

    pub fn artifact_path(dir: &Path, at: chrono::DateTime<chrono::Local>) -> PathBuf {
        dir.join(format!("{}.json", at.format(FILE_NAME_FORMAT)))
    }
}

impl ArtifactExporter for HistogramExporter {
    fn export(&self, table: &FinalizedTable) -> Result<Option<PathBuf>, ExportError> {
        let spectrum = MassSpectrum::build(table, &self.settings, &self.catalog)?;
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| ExportError::Io(self.output_dir.clone(), e))?;
        let path = Self::artifact_path(&self.output_dir, chrono::Local::now());
        let json = serde_json::to_vec_pretty(&spectrum)
            .map_err(|e| ExportError::Encode(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| ExportError::Io(path.clone(), e))?;
        tracing::info!(path = %path.display(), "histogram exported");
        Ok(Some(path))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("cannot build histogram: {0}")]
    Records(#[from] RecordError),

    #[error("failed to write {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to encode artifact: {0}")]
    Encode(String),
}
