//! Raw counts to calibrated photon counts.
//!
//! Per point: `(raw - dark) * calibration / delta_x * wavelength / 1000`.
//! The operations are applied in exactly this order so results are
//! reproducible to the last bit across runs.

use crate::error::AppResult;
use crate::spectrum::{CalibrationCurve, DarkSpectrum, Spectrum};
use std::sync::Arc;

/// Convert one raw spectrum to photon counts per nm.
///
/// `raw` and `dark` must share the same wavelength axis exactly. The
/// calibration must have one factor per point, and when it records
/// wavelengths they must be within `tolerance_nm` of the axis.
pub fn convert(
    raw: &Spectrum,
    dark: &DarkSpectrum,
    calibration: &CalibrationCurve,
    tolerance_nm: f64,
) -> AppResult<Spectrum> {
    let axis = raw.axis();
    dark.check_axis(axis)?;
    let dark = dark.spectrum();
    calibration.check_alignment(axis, tolerance_nm)?;

    let values = raw
        .values()
        .iter()
        .zip(dark.values())
        .zip(calibration.factors())
        .zip(axis.delta_x().iter().zip(axis.wavelengths()))
        .map(|(((r, d), k), (dx, w))| (r - d) * k / dx * w / 1000.0)
        .collect();
    Spectrum::new(Arc::clone(axis), values)
}
