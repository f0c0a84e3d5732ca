//! Power-normalized window integration.
//!
//! For each column of a [`MeasurementSet`] and each of the two windows:
//! select the points strictly inside the window, recompute the spacing over
//! that subset with the centered-difference gradient, sum
//! `value * spacing`, and divide by the column's power.

use crate::analysis::{AnalysisFlag, AnalysisFlags};
use crate::measurement::{Column, MeasurementSet};
use crate::spectrum::gradient;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Open wavelength interval `(low, high)` in nm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthWindow {
    /// Exclusive lower bound.
    pub low: f64,
    /// Exclusive upper bound.
    pub high: f64,
}

impl WavelengthWindow {
    /// Window `(low, high)`; no ordering check, an inverted window is empty.
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Strict containment, both ends excluded.
    pub fn contains(&self, wavelength: f64) -> bool {
        self.low < wavelength && wavelength < self.high
    }

    /// Integrate `values` over the points of `wavelengths` inside the window.
    ///
    /// Returns `None` when fewer than two points fall inside, where the
    /// spacing is undefined.
    pub fn integrate(&self, wavelengths: &[f64], values: &[f64]) -> Option<f64> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = wavelengths
            .iter()
            .zip(values)
            .filter(|(w, _)| self.contains(**w))
            .map(|(w, v)| (*w, *v))
            .unzip();
        if xs.len() < 2 {
            return None;
        }
        let spacing = gradient(&xs)?;
        Some(ys.iter().zip(&spacing).map(|(v, dx)| v * dx).sum())
    }
}

/// The excitation and emission windows of one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    /// Window around the excitation line.
    pub excitation: WavelengthWindow,
    /// Window covering the photoluminescence band.
    pub emission: WavelengthWindow,
}

impl RegionBounds {
    /// Excitation window `(excit_low, excit_high)`, emission window `(emit_low, emit_high)`.
    pub fn new(excit_low: f64, excit_high: f64, emit_low: f64, emit_high: f64) -> Self {
        Self {
            excitation: WavelengthWindow::new(excit_low, excit_high),
            emission: WavelengthWindow::new(emit_low, emit_high),
        }
    }

    /// `[excit_low, excit_high, emit_low, emit_high]`
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.excitation.low,
            self.excitation.high,
            self.emission.low,
            self.emission.high,
        ]
    }
}

impl Default for RegionBounds {
    fn default() -> Self {
        Self::new(400.0, 410.0, 500.0, 710.0)
    }
}

/// Excitation and emission sums of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSums {
    /// Column label (`meas_0`, ..., `mean_photon_counts`).
    pub label: String,
    /// Power-normalized excitation window sum.
    pub excitation: f64,
    /// Power-normalized emission window sum.
    pub emission: f64,
}

impl ColumnSums {
    /// Sums for the column named `label`.
    pub fn new(label: impl Into<String>, excitation: f64, emission: f64) -> Self {
        Self {
            label: label.into(),
            excitation,
            emission,
        }
    }
}

/// Region sums of every column of one set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSums {
    bounds: RegionBounds,
    measurements: Vec<ColumnSums>,
    mean: ColumnSums,
    flags: AnalysisFlags,
}

impl RegionSums {
    /// Assemble sums computed elsewhere.
    pub fn from_columns(
        bounds: RegionBounds,
        measurements: Vec<ColumnSums>,
        mean: ColumnSums,
        flags: AnalysisFlags,
    ) -> Self {
        Self {
            bounds,
            measurements,
            mean,
            flags,
        }
    }

    /// Bounds the sums were computed with.
    pub fn bounds(&self) -> &RegionBounds {
        &self.bounds
    }

    /// Per-measurement sums, mean excluded.
    pub fn measurements(&self) -> &[ColumnSums] {
        &self.measurements
    }

    /// Sums of the mean column.
    pub fn mean(&self) -> &ColumnSums {
        &self.mean
    }

    /// All columns, the mean last.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnSums> {
        self.measurements.iter().chain(std::iter::once(&self.mean))
    }

    /// Flags raised while integrating.
    pub fn flags(&self) -> &AnalysisFlags {
        &self.flags
    }

    /// Per-measurement excitation sums.
    pub fn excitation_values(&self) -> Vec<f64> {
        self.measurements.iter().map(|c| c.excitation).collect()
    }

    /// Per-measurement emission sums.
    pub fn emission_values(&self) -> Vec<f64> {
        self.measurements.iter().map(|c| c.emission).collect()
    }
}

fn window_sum(
    window: &WavelengthWindow,
    region: &'static str,
    wavelengths: &[f64],
    column: &Column<'_>,
    flags: &mut AnalysisFlags,
) -> f64 {
    let Some(area) = window.integrate(wavelengths, column.values) else {
        flags.insert(AnalysisFlag::InvalidBounds);
        return 0.0;
    };
    if column.power_ua == 0.0 || !column.power_ua.is_finite() {
        warn!(region, column = column.label, power_ua = column.power_ua, "cannot normalize by power");
        flags.insert(AnalysisFlag::DivisionUndefined);
        return f64::NAN;
    }
    area / column.power_ua
}

fn check_window(window: &WavelengthWindow, region: &'static str, wavelengths: &[f64]) {
    let (first, last) = match (wavelengths.first(), wavelengths.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return,
    };
    let inside = wavelengths.iter().filter(|w| window.contains(**w)).count();
    if inside < 2 {
        warn!(
            region,
            low = window.low,
            high = window.high,
            points = inside,
            "window selects fewer than two points; sum set to 0"
        );
    } else if window.low < first || window.high > last {
        warn!(
            region,
            low = window.low,
            high = window.high,
            axis_low = first,
            axis_high = last,
            "window extends past the wavelength axis; integrating the overlap"
        );
    }
}

/// Integrate both windows over every column of `set`.
pub fn integrate(set: &MeasurementSet, bounds: &RegionBounds) -> RegionSums {
    let wavelengths = set.axis().wavelengths();
    check_window(&bounds.excitation, "excitation", wavelengths);
    check_window(&bounds.emission, "emission", wavelengths);

    let mut flags = AnalysisFlags::new();
    let mut measurements = Vec::with_capacity(set.measurements().len());
    let mut mean = None;
    for column in set.columns() {
        let sums = ColumnSums::new(
            column.label,
            window_sum(&bounds.excitation, "excitation", wavelengths, &column, &mut flags),
            window_sum(&bounds.emission, "emission", wavelengths, &column, &mut flags),
        );
        if column.is_mean {
            mean = Some(sums);
        } else {
            measurements.push(sums);
        }
    }
    // columns() always ends with the mean
    let mean = mean.unwrap_or_else(|| ColumnSums::new(crate::measurement::MEAN_COLUMN, 0.0, 0.0));
    RegionSums::from_columns(*bounds, measurements, mean, flags)
}
