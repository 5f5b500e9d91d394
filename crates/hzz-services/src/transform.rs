//! Per-chunk physics transformation.
//!
//! A [`Transformer`] is a pure function from one chunk to one chunk: it may
//! drop records and add derived columns, and must not depend on any other
//! chunk. Workers take it as an injected trait object.
//!
//! [`FourLeptonSelection`] is the stock H→ZZ→4ℓ selection: keep events
//! whose four leading leptons pass the flavour and charge cuts, and add
//! their invariant mass.

use hzz_core::records::{Column, EventChunk, RecordError};

pub trait Transformer: Send + Sync {
    fn transform(&self, chunk: EventChunk) -> Result<EventChunk, TransformError>;
}

/// Passes chunks through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transformer for Identity {
    fn transform(&self, chunk: EventChunk) -> Result<EventChunk, TransformError> {
        Ok(chunk)
    }
}

// ── Four-lepton selection ─────────────────────────────────────────────────────

/// Name of the derived mass column, in GeV.
pub const MASS_COLUMN: &str = "mass";

/// |pdg id| sums of four leptons that form two same-flavour pairs:
/// eeee = 44, eeμμ = 48, μμμμ = 52.
const ALLOWED_FLAVOUR_SUMS: [i64; 3] = [44, 48, 52];

const MEV_TO_GEV: f64 = 0.001;

#[derive(Debug, Clone, Copy, Default)]
pub struct FourLeptonSelection;

impl FourLeptonSelection {
    fn keep(types: &[i64], charges: &[i64]) -> bool {
        if types.len() < 4 || charges.len() < 4 {
            return false;
        }
        let flavour: i64 = types[..4].iter().sum();
        let charge: i64 = charges[..4].iter().sum();
        ALLOWED_FLAVOUR_SUMS.contains(&flavour) && charge == 0
    }
}

/// Invariant mass of the first four (pt, eta, phi, E) lepton vectors, in
/// the input's energy unit.
pub fn four_lepton_mass(pt: &[f64], eta: &[f64], phi: &[f64], e: &[f64]) -> f64 {
    let (mut px, mut py, mut pz, mut energy) = (0.0, 0.0, 0.0, 0.0);
    for i in 0..4 {
        px += pt[i] * phi[i].cos();
        py += pt[i] * phi[i].sin();
        pz += pt[i] * eta[i].sinh();
        energy += e[i];
    }
    (energy * energy - px * px - py * py - pz * pz).max(0.0).sqrt()
}

impl Transformer for FourLeptonSelection {
    fn transform(&self, chunk: EventChunk) -> Result<EventChunk, TransformError> {
        let mask: Vec<bool> = {
            let types = chunk.int_list("lep_type")?;
            let charges = chunk.int_list("lep_charge")?;
            types
                .iter()
                .zip(charges)
                .map(|(t, q)| Self::keep(t, q))
                .collect()
        };
        let mut selected = chunk.filter(&mask)?;

        let mass = {
            let pt = selected.float_list("lep_pt")?;
            let eta = selected.float_list("lep_eta")?;
            let phi = selected.float_list("lep_phi")?;
            let e = selected.float_list("lep_E")?;
            let mut mass = Vec::with_capacity(selected.len());
            for i in 0..selected.len() {
                if [&pt[i], &eta[i], &phi[i], &e[i]].iter().any(|v| v.len() < 4) {
                    return Err(TransformError::InvalidEvent {
                        index: i,
                        reason: "fewer than four lepton kinematics".to_string(),
                    });
                }
                mass.push(four_lepton_mass(&pt[i], &eta[i], &phi[i], &e[i]) * MEV_TO_GEV);
            }
            mass
        };
        selected.insert(MASS_COLUMN, Column::Float(mass))?;
        Ok(selected)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Records(#[from] RecordError),

    #[error("event {index}: {reason}")]
    InvalidEvent { index: usize, reason: String },
}
