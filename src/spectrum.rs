//! Wavelength axis, spectra and calibration curves.
//!
//! Every curve in the system is a value vector aligned to one
//! [`WavelengthAxis`]. The axis is captured once from the spectrometer and
//! shared behind an `Arc`; it carries the centered-difference spacing
//! (`delta_x`) used to turn counts into per-nm densities.

use crate::error::{AppResult, PlqyError};
use std::sync::Arc;

/// Centered-difference gradient of `x` with respect to its index.
///
/// Interior points use `(x[i+1] - x[i-1]) / 2`, the two end points use
/// one-sided differences. Returns `None` for fewer than two points, where the
/// spacing is undefined.
pub fn gradient(x: &[f64]) -> Option<Vec<f64>> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let mut out = Vec::with_capacity(n);
    out.push(x[1] - x[0]);
    for i in 1..n - 1 {
        out.push((x[i + 1] - x[i - 1]) / 2.0);
    }
    out.push(x[n - 1] - x[n - 2]);
    Some(out)
}

/// The instrument's native wavelength axis (nm) with its local spacing.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthAxis {
    wavelengths: Vec<f64>,
    delta_x: Vec<f64>,
}

impl WavelengthAxis {
    /// Build an axis, checking that it is finite and strictly increasing.
    pub fn new(wavelengths: Vec<f64>) -> AppResult<Self> {
        if wavelengths.iter().any(|w| !w.is_finite()) {
            return Err(PlqyError::Instrument(
                "wavelength axis contains non-finite values".into(),
            ));
        }
        if let Some(i) = wavelengths.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PlqyError::Instrument(format!(
                "wavelength axis is not strictly increasing at index {}",
                i + 1
            )));
        }
        let delta_x = gradient(&wavelengths).ok_or_else(|| {
            PlqyError::Instrument(format!(
                "wavelength axis needs at least 2 points, got {}",
                wavelengths.len()
            ))
        })?;
        Ok(Self {
            wavelengths,
            delta_x,
        })
    }

    /// Wavelengths in nm.
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Local spacing for every point of the axis.
    pub fn delta_x(&self) -> &[f64] {
        &self.delta_x
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    /// True when the axis has no points, which `new` never produces.
    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// First and last wavelength.
    pub fn range(&self) -> (f64, f64) {
        (
            self.wavelengths[0],
            self.wavelengths[self.wavelengths.len() - 1],
        )
    }

    /// Index of the wavelength closest to `nm`.
    pub fn nearest_index(&self, nm: f64) -> usize {
        self.wavelengths
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - nm).abs().total_cmp(&(*b - nm).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// A fixed-length curve aligned to a wavelength axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    axis: Arc<WavelengthAxis>,
    values: Vec<f64>,
}

impl Spectrum {
    /// Pair `values` with `axis`; lengths must agree.
    pub fn new(axis: Arc<WavelengthAxis>, values: Vec<f64>) -> AppResult<Self> {
        if values.len() != axis.len() {
            return Err(PlqyError::Instrument(format!(
                "spectrum has {} points but the wavelength axis has {}",
                values.len(),
                axis.len()
            )));
        }
        Ok(Self { axis, values })
    }

    /// The shared axis.
    pub fn axis(&self) -> &Arc<WavelengthAxis> {
        &self.axis
    }

    /// Curve values, one per axis point.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Consume the spectrum, returning its values.
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Largest value of the curve, `NaN`-safe.
    pub fn peak(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Baseline spectrum captured with the excitation source blocked.
#[derive(Debug, Clone, PartialEq)]
pub struct DarkSpectrum(Spectrum);

impl DarkSpectrum {
    /// Wrap a spectrum captured without illumination.
    pub fn new(spectrum: Spectrum) -> Self {
        Self(spectrum)
    }

    /// The underlying curve.
    pub fn spectrum(&self) -> &Spectrum {
        &self.0
    }

    /// Check that this dark was captured on `axis` (shared or equal wavelengths).
    pub fn check_axis(&self, axis: &Arc<WavelengthAxis>) -> AppResult<()> {
        let own = self.0.axis();
        if Arc::ptr_eq(axis, own) || axis.wavelengths() == own.wavelengths() {
            return Ok(());
        }
        Err(PlqyError::CalibrationMismatch(
            "dark spectrum was captured on a different wavelength axis".into(),
        ))
    }
}

/// Per-point irradiance calibration factors.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    factors: Vec<f64>,
    wavelengths: Option<Vec<f64>>,
}

impl CalibrationCurve {
    /// Calibration with factors only, aligned to the instrument axis by index.
    pub fn from_factors(factors: Vec<f64>) -> Self {
        Self {
            factors,
            wavelengths: None,
        }
    }

    /// Calibration that also records the wavelength of every factor.
    pub fn with_wavelengths(wavelengths: Vec<f64>, factors: Vec<f64>) -> AppResult<Self> {
        if wavelengths.len() != factors.len() {
            return Err(PlqyError::CalibrationMismatch(format!(
                "{} wavelengths but {} calibration factors",
                wavelengths.len(),
                factors.len()
            )));
        }
        Ok(Self {
            factors,
            wavelengths: Some(wavelengths),
        })
    }

    /// Flat calibration; used by the simulated instruments only.
    pub fn uniform(len: usize, factor: f64) -> Self {
        Self::from_factors(vec![factor; len])
    }

    /// Calibration factors.
    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    /// Wavelengths recorded in the calibration artifact, if any.
    pub fn wavelengths(&self) -> Option<&[f64]> {
        self.wavelengths.as_deref()
    }

    /// Number of factors.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// True if the curve has no factors.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Same curve with every factor multiplied by `k`.
    pub fn scaled(&self, k: f64) -> Self {
        Self {
            factors: self.factors.iter().map(|f| f * k).collect(),
            wavelengths: self.wavelengths.clone(),
        }
    }

    /// Check that this curve lines up with `axis`.
    ///
    /// Lengths must match exactly. Recorded wavelengths must each lie within
    /// `tolerance_nm` of the axis point with the same index.
    pub fn check_alignment(&self, axis: &WavelengthAxis, tolerance_nm: f64) -> AppResult<()> {
        if self.len() != axis.len() {
            return Err(PlqyError::CalibrationMismatch(format!(
                "calibration has {} factors but the wavelength axis has {} points",
                self.len(),
                axis.len()
            )));
        }
        if let Some(wavelengths) = &self.wavelengths {
            let worst = wavelengths
                .iter()
                .zip(axis.wavelengths())
                .enumerate()
                .map(|(i, (c, a))| (i, (c - a).abs()))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((i, diff)) = worst {
                if diff.is_nan() || diff > tolerance_nm {
                    return Err(PlqyError::CalibrationMismatch(format!(
                        "calibration wavelength at index {i} is {diff:.4} nm off the instrument axis \
                         (tolerance {tolerance_nm} nm)"
                    )));
                }
            }
        }
        Ok(())
    }
}
