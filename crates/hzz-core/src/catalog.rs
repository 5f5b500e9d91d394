//! Sample catalog and per-variant metadata.
//!
//! The catalog names every dataset a run touches: one observed sample per
//! data-taking period, and simulated groups made of variants. Variant
//! metadata (cross-section, sum of weights, efficiency, dataset id) is loaded
//! from a TOML file shaped like:
//!
//! ```toml
//! [variants.llll]
//! dsid = 345060
//! xsec = 1.2578
//! sumw = 7538705.8077
//! red_eff = 0.8
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire::OBSERVED_IDENTIFIER;

// ── Period ────────────────────────────────────────────────────────────────────

/// Data-taking period. Selects the observed sample and the luminosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[default]
    A,
    B,
    C,
    D,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::A, Period::B, Period::C, Period::D];

    /// Integrated luminosity in fb⁻¹.
    pub fn luminosity_fb(self) -> f64 {
        match self {
            Period::A => 0.5,
            Period::B => 1.9,
            Period::C => 2.9,
            Period::D => 4.7,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::A => "A",
            Period::B => "B",
            Period::C => "C",
            Period::D => "D",
        }
    }
}

impl FromStr for Period {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Period::A),
            "B" => Ok(Period::B),
            "C" => Ok(Period::C),
            "D" => Ok(Period::D),
            _ => Err(CatalogError::UnknownPeriod(s.to_string())),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// A named group of samples. The group name is the aggregation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleGroup {
    pub name: String,
    /// Display colour for exported histograms, e.g. "#ff0000".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub variants: Vec<String>,
}

impl SampleGroup {
    fn new(name: &str, color: Option<&str>, variants: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            color: color.map(str::to_string),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Every dataset a run may touch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleCatalog {
    /// Observed samples, one per period, in period order.
    pub observed: SampleGroup,
    /// Simulated groups, in the order they are published and stacked.
    pub simulated: Vec<SampleGroup>,
}

impl Default for SampleCatalog {
    fn default() -> Self {
        Self {
            observed: SampleGroup::new(
                OBSERVED_IDENTIFIER,
                None,
                &["data_A", "data_B", "data_C", "data_D"],
            ),
            simulated: vec![
                SampleGroup::new(
                    r"Background $Z,t\bar{t}$",
                    Some("#6b59d3"),
                    &["Zee", "Zmumu", "ttbar_lep"],
                ),
                SampleGroup::new(r"Background $ZZ^*$", Some("#ff0000"), &["llll"]),
                SampleGroup::new(
                    r"Signal ($m_H$ = 125 GeV)",
                    Some("#00cdff"),
                    &["ggH125_ZZ4lep", "VBFH125_ZZ4lep", "WH125_ZZ4lep", "ZH125_ZZ4lep"],
                ),
            ],
        }
    }
}

impl SampleCatalog {
    /// The observed sample read for `period`.
    pub fn observed_sample(&self, period: Period) -> Option<&str> {
        self.observed
            .variants
            .get(period.index())
            .map(String::as_str)
    }

    /// Every `(group, variant)` pair of the simulated class, in publish order.
    pub fn simulated_datasets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.simulated.iter().flat_map(|g| {
            g.variants
                .iter()
                .map(move |v| (g.name.as_str(), v.as_str()))
        })
    }

    pub fn group(&self, name: &str) -> Option<&SampleGroup> {
        self.simulated.iter().find(|g| g.name == name)
    }
}

// ── Variant metadata ──────────────────────────────────────────────────────────

/// Bookkeeping for one simulated variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantInfo {
    /// Dataset id, part of the sample's file name.
    pub dsid: u32,
    /// Cross-section in pb.
    pub xsec: f64,
    /// Sum of generator weights.
    pub sumw: f64,
    /// Reduction efficiency of the pre-selection.
    pub red_eff: f64,
}

impl VariantInfo {
    /// Per-event normalization for `luminosity_fb`:
    ///
    ///   lumi × 1000 × xsec / (sumw × red_eff)
    ///
    /// The factor 1000 converts fb⁻¹ to pb⁻¹. `None` if the result is not a
    /// finite number (zero or missing denominators).
    pub fn normalization(&self, luminosity_fb: f64) -> Option<f64> {
        let n = luminosity_fb * 1000.0 * self.xsec / (self.sumw * self.red_eff);
        n.is_finite().then_some(n)
    }
}

/// Variant name → metadata. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantMetadata {
    #[serde(default)]
    pub variants: BTreeMap<String, VariantInfo>,
}

impl VariantMetadata {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::ReadFailed(path.to_path_buf(), e))?;
        Self::parse(&text).map_err(|e| CatalogError::ParseFailed(path.to_path_buf(), e))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn get(&self, variant: &str) -> Option<&VariantInfo> {
        self.variants.get(variant)
    }

    pub fn insert(&mut self, variant: impl Into<String>, info: VariantInfo) {
        self.variants.insert(variant.into(), info);
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown data-taking period {0:?} (expected A, B, C or D)")]
    UnknownPeriod(String),
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}
