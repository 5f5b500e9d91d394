//! Simulated-event weights.
//!
//! Every simulated chunk gets a `totalWeight` column: the product of the
//! per-event weight variables and the variant's normalization factor
//! (luminosity × 1000 × xsec / (sumw × red_eff)).

use std::collections::HashMap;

use hzz_core::catalog::{Period, VariantMetadata};
use hzz_core::records::{Column, EventChunk, RecordError};

pub const TOTAL_WEIGHT_COLUMN: &str = "totalWeight";

/// Per-event weight columns multiplied into the total weight.
pub const WEIGHT_VARIABLES: [&str; 5] = [
    "mcWeight",
    "scaleFactor_PILEUP",
    "scaleFactor_ELE",
    "scaleFactor_MUON",
    "scaleFactor_LepTRIGGER",
];

/// Variant → normalization factor.
pub trait NormalizationTable: Send + Sync {
    fn normalization(&self, variant: &str) -> Option<f64>;
}

impl NormalizationTable for HashMap<String, f64> {
    fn normalization(&self, variant: &str) -> Option<f64> {
        self.get(variant).copied()
    }
}

/// Normalizations derived from variant metadata at one period's luminosity.
#[derive(Debug, Clone)]
pub struct LuminosityNormalization {
    metadata: VariantMetadata,
    luminosity_fb: f64,
}

impl LuminosityNormalization {
    pub fn new(metadata: VariantMetadata, period: Period) -> Self {
        Self {
            metadata,
            luminosity_fb: period.luminosity_fb(),
        }
    }

    pub fn luminosity_fb(&self) -> f64 {
        self.luminosity_fb
    }
}

impl NormalizationTable for LuminosityNormalization {
    fn normalization(&self, variant: &str) -> Option<f64> {
        self.metadata
            .get(variant)
            .and_then(|info| info.normalization(self.luminosity_fb))
    }
}

/// Add the `totalWeight` column to `chunk`.
pub fn apply_weights(mut chunk: EventChunk, normalization: f64) -> Result<EventChunk, RecordError> {
    let mut total = vec![normalization; chunk.len()];
    for name in WEIGHT_VARIABLES {
        for (w, v) in total.iter_mut().zip(chunk.float(name)?) {
            *w *= v;
        }
    }
    chunk.insert(TOTAL_WEIGHT_COLUMN, Column::Float(total))?;
    Ok(chunk)
}
