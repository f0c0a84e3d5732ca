//! Spectral analysis: calibration, window integration and the PLQY estimate.
//!
//! Conversion failures are hard errors. Integration and estimation never
//! fail: degenerate inputs produce sentinel values (`0.0` or `NaN`) tagged
//! with an [`AnalysisFlag`] so the result can still be inspected and saved.

pub mod convert;
pub mod integrate;
pub mod plqy;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use convert::convert;
pub use integrate::{integrate, ColumnSums, RegionBounds, RegionSums, WavelengthWindow};
pub use plqy::{estimate, PlqyResult};

/// Why a value in an analysis result is a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnalysisFlag {
    /// A window selected fewer than two points; its sum is `0.0`.
    InvalidBounds,
    /// A divisor was zero or not finite; the quotient is `NaN`.
    DivisionUndefined,
    /// Fewer than two measurements; the spread is `NaN`.
    InsufficientReplicates,
}

impl fmt::Display for AnalysisFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AnalysisFlag::InvalidBounds => "invalid bounds",
            AnalysisFlag::DivisionUndefined => "division undefined",
            AnalysisFlag::InsufficientReplicates => "insufficient replicates",
        };
        f.write_str(text)
    }
}

/// Ordered, de-duplicated set of flags.
pub type AnalysisFlags = BTreeSet<AnalysisFlag>;
