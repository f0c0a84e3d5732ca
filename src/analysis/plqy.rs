//! PLQY point estimate and first-order uncertainty.
//!
//! The point estimate uses the mean columns; the spread uses the
//! per-measurement columns, treating the four window sums as independent.
//! Calibration uncertainty is not propagated.

use crate::analysis::integrate::{RegionBounds, RegionSums};
use crate::analysis::{AnalysisFlag, AnalysisFlags};
use crate::measurement::sample_std;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Result of one blank/sample comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlqyResult {
    /// Photons emitted over photons absorbed.
    pub plqy: f64,
    /// Propagated standard deviation of `plqy`.
    pub plqy_std: f64,
    /// Sample minus blank emission sum (mean columns).
    pub photons_emitted: f64,
    /// Blank minus sample excitation sum (mean columns).
    pub photons_absorbed: f64,
    /// Bounds used for both sets.
    pub bounds: RegionBounds,
    /// Flags from integration and estimation.
    pub flags: AnalysisFlags,
}

impl PlqyResult {
    /// True when no sentinel values are present.
    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }
}

impl fmt::Display for PlqyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PLQY = {:.4} ± {:.4} (emitted {:.6e}, absorbed {:.6e})",
            self.plqy, self.plqy_std, self.photons_emitted, self.photons_absorbed
        )?;
        if !self.flags.is_empty() {
            let flags: Vec<String> = self.flags.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", flags.join(", "))?;
        }
        Ok(())
    }
}

/// Compare blank and sample region sums.
pub fn estimate(blank: &RegionSums, sample: &RegionSums) -> PlqyResult {
    let mut flags: AnalysisFlags = blank.flags().union(sample.flags()).copied().collect();
    if blank.bounds() != sample.bounds() {
        warn!("blank and sample were integrated with different bounds; reporting the sample's");
    }

    let photons_emitted = sample.mean().emission - blank.mean().emission;
    let photons_absorbed = blank.mean().excitation - sample.mean().excitation;

    let plqy = if photons_absorbed == 0.0 || !photons_absorbed.is_finite() {
        flags.insert(AnalysisFlag::DivisionUndefined);
        f64::NAN
    } else {
        photons_emitted / photons_absorbed
    };

    let spreads = [
        sample_std(&sample.emission_values()),
        sample_std(&blank.emission_values()),
        sample_std(&blank.excitation_values()),
        sample_std(&sample.excitation_values()),
    ];
    let plqy_std = match spreads {
        [Some(s_em), Some(b_em), Some(b_ex), Some(s_ex)] => {
            if photons_emitted == 0.0 || plqy.is_nan() {
                flags.insert(AnalysisFlag::DivisionUndefined);
                f64::NAN
            } else {
                plqy * ((s_em.powi(2) + b_em.powi(2)) / photons_emitted.powi(2)
                    + (b_ex.powi(2) + s_ex.powi(2)) / photons_absorbed.powi(2))
                .sqrt()
            }
        }
        _ => {
            flags.insert(AnalysisFlag::InsufficientReplicates);
            f64::NAN
        }
    };

    debug!(plqy, plqy_std, photons_emitted, photons_absorbed, "PLQY estimated");
    PlqyResult {
        plqy,
        plqy_std,
        photons_emitted,
        photons_absorbed,
        bounds: *sample.bounds(),
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::integrate::ColumnSums;
    use crate::measurement::MEAN_COLUMN;
    use approx::assert_relative_eq;

    fn sums(columns: &[(f64, f64)], mean: (f64, f64)) -> RegionSums {
        RegionSums::from_columns(
            RegionBounds::default(),
            columns
                .iter()
                .enumerate()
                .map(|(i, (ex, em))| ColumnSums::new(format!("meas_{i}"), *ex, *em))
                .collect(),
            ColumnSums::new(MEAN_COLUMN, mean.0, mean.1),
            AnalysisFlags::new(),
        )
    }

    #[test]
    fn reference_values() {
        let blank = sums(&[(99.0, 9.0), (101.0, 11.0)], (100.0, 10.0));
        let sample = sums(&[(39.0, 49.0), (41.0, 51.0)], (40.0, 50.0));
        let result = estimate(&blank, &sample);

        assert_relative_eq!(result.photons_absorbed, 60.0);
        assert_relative_eq!(result.photons_emitted, 40.0);
        assert_relative_eq!(result.plqy, 0.667, epsilon = 1e-3);
        assert!(result.is_clean());

        // Every sigma is sqrt(2)
        let expected = (2.0_f64 / 3.0) * (4.0 / 1600.0 + 4.0 / 3600.0_f64).sqrt();
        assert_relative_eq!(result.plqy_std, expected, max_relative = 1e-12);
    }

    #[test]
    fn zero_absorption_is_nan_and_flagged() {
        let blank = sums(&[(50.0, 1.0), (50.0, 1.0)], (50.0, 1.0));
        let sample = sums(&[(50.0, 5.0), (50.0, 5.0)], (50.0, 5.0));
        let result = estimate(&blank, &sample);

        assert!(result.plqy.is_nan());
        assert!(result.flags.contains(&AnalysisFlag::DivisionUndefined));
        assert!(!result.is_clean());
    }

    #[test]
    fn single_measurement_has_no_spread() {
        let blank = sums(&[(100.0, 10.0)], (100.0, 10.0));
        let sample = sums(&[(40.0, 50.0)], (40.0, 50.0));
        let result = estimate(&blank, &sample);

        assert_relative_eq!(result.plqy, 40.0 / 60.0);
        assert!(result.plqy_std.is_nan());
        assert!(result.flags.contains(&AnalysisFlag::InsufficientReplicates));
    }

    #[test]
    fn integration_flags_carry_over() {
        let mut flags = AnalysisFlags::new();
        flags.insert(AnalysisFlag::InvalidBounds);
        let blank = RegionSums::from_columns(
            RegionBounds::default(),
            vec![],
            ColumnSums::new(MEAN_COLUMN, 0.0, 0.0),
            flags,
        );
        let sample = sums(&[(1.0, 1.0), (1.0, 1.0)], (1.0, 1.0));
        let result = estimate(&blank, &sample);
        assert!(result.flags.contains(&AnalysisFlag::InvalidBounds));
    }

    #[test]
    fn display_lists_flags() {
        let blank = sums(&[(100.0, 10.0)], (100.0, 10.0));
        let sample = sums(&[(40.0, 50.0)], (40.0, 50.0));
        let text = estimate(&blank, &sample).to_string();
        assert!(text.starts_with("PLQY = 0.6667"));
        assert!(text.contains("insufficient replicates"));
    }
}
