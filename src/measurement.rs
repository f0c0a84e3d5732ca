//! Calibrated measurements and the blank/sample sets they form.

use crate::error::{AppResult, PlqyError};
use crate::spectrum::WavelengthAxis;
use std::sync::Arc;

/// Column label of the mean curve in a persisted set.
pub const MEAN_COLUMN: &str = "mean_photon_counts";

/// Column label of the overall mean power in a persisted set.
pub const MEAN_POWER_COLUMN: &str = "laser_power_mean_uA";

/// Label of the `index`-th measurement (`meas_0`, `meas_1`, ...).
pub fn measurement_label(index: usize) -> String {
    format!("meas_{index}")
}

/// Mean power reported by the meter during one exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    /// Arithmetic mean of the polled current, in µA.
    pub mean_ua: f64,
    /// How many meter readings the mean covers.
    pub readings: usize,
}

impl PowerReading {
    /// Reduce a list of readings (µA) to their mean; `None` if empty.
    pub fn from_readings(readings_ua: &[f64]) -> Option<Self> {
        mean(readings_ua).map(|mean_ua| Self {
            mean_ua,
            readings: readings_ua.len(),
        })
    }
}

/// One subrun-averaged, calibrated spectrum and its power.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Column label, e.g. `meas_0`.
    pub label: String,
    /// Photon counts per nm, aligned to the set's axis.
    pub photon_counts: Vec<f64>,
    /// Mean excitation power during the measurement, µA.
    pub power_ua: f64,
}

/// Borrowed view of one column of a set, measurement or mean.
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    /// Column label.
    pub label: &'a str,
    /// Curve values.
    pub values: &'a [f64],
    /// Power used to normalize this column, µA.
    pub power_ua: f64,
    /// True for the mean column.
    pub is_mean: bool,
}

/// All measurements of one blank or sample collection plus their means.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSet {
    axis: Arc<WavelengthAxis>,
    measurements: Vec<Measurement>,
    mean_photon_counts: Vec<f64>,
    mean_power_ua: f64,
}

impl MeasurementSet {
    /// Build a set, computing the column-wise mean curve and the mean power.
    pub fn from_measurements(
        axis: Arc<WavelengthAxis>,
        measurements: Vec<Measurement>,
    ) -> AppResult<Self> {
        if measurements.is_empty() {
            return Err(PlqyError::Configuration(
                "a measurement set needs at least one measurement".into(),
            ));
        }
        check_lengths(&axis, &measurements)?;
        let curves: Vec<&[f64]> = measurements
            .iter()
            .map(|m| m.photon_counts.as_slice())
            .collect();
        let mean_photon_counts = column_mean(&curves, axis.len())?;
        let powers: Vec<f64> = measurements.iter().map(|m| m.power_ua).collect();
        let mean_power_ua = mean(&powers).unwrap_or(f64::NAN);
        Self::from_parts(axis, measurements, mean_photon_counts, mean_power_ua)
    }

    /// Assemble a set from stored parts, keeping the stored means as-is.
    pub fn from_parts(
        axis: Arc<WavelengthAxis>,
        measurements: Vec<Measurement>,
        mean_photon_counts: Vec<f64>,
        mean_power_ua: f64,
    ) -> AppResult<Self> {
        if measurements.is_empty() {
            return Err(PlqyError::Configuration(
                "a measurement set needs at least one measurement".into(),
            ));
        }
        check_lengths(&axis, &measurements)?;
        if mean_photon_counts.len() != axis.len() {
            return Err(PlqyError::CalibrationMismatch(format!(
                "{MEAN_COLUMN} has {} points but the wavelength axis has {}",
                mean_photon_counts.len(),
                axis.len()
            )));
        }
        Ok(Self {
            axis,
            measurements,
            mean_photon_counts,
            mean_power_ua,
        })
    }

    /// Shared wavelength axis.
    pub fn axis(&self) -> &Arc<WavelengthAxis> {
        &self.axis
    }

    /// Individual measurements in collection order.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Column-wise mean of the measurement curves.
    pub fn mean_photon_counts(&self) -> &[f64] {
        &self.mean_photon_counts
    }

    /// Mean of the per-measurement powers, µA.
    pub fn mean_power_ua(&self) -> f64 {
        self.mean_power_ua
    }

    /// Every column: measurements first, then the mean.
    pub fn columns(&self) -> impl Iterator<Item = Column<'_>> {
        self.measurements
            .iter()
            .map(|m| Column {
                label: &m.label,
                values: &m.photon_counts,
                power_ua: m.power_ua,
                is_mean: false,
            })
            .chain(std::iter::once(Column {
                label: MEAN_COLUMN,
                values: &self.mean_photon_counts,
                power_ua: self.mean_power_ua,
                is_mean: true,
            }))
    }
}

fn check_lengths(axis: &WavelengthAxis, measurements: &[Measurement]) -> AppResult<()> {
    for m in measurements {
        if m.photon_counts.len() != axis.len() {
            return Err(PlqyError::CalibrationMismatch(format!(
                "{} has {} points but the wavelength axis has {}",
                m.label,
                m.photon_counts.len(),
                axis.len()
            )));
        }
    }
    Ok(())
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator), `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Element-wise mean of equally long curves.
pub fn column_mean(curves: &[&[f64]], len: usize) -> AppResult<Vec<f64>> {
    if curves.is_empty() {
        return Err(PlqyError::Configuration(
            "cannot average zero curves".into(),
        ));
    }
    let mut acc = vec![0.0; len];
    for curve in curves {
        if curve.len() != len {
            return Err(PlqyError::Instrument(format!(
                "curve has {} points, expected {len}",
                curve.len()
            )));
        }
        for (a, v) in acc.iter_mut().zip(curve.iter()) {
            *a += v;
        }
    }
    let n = curves.len() as f64;
    acc.iter_mut().for_each(|a| *a /= n);
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn axis() -> Arc<WavelengthAxis> {
        Arc::new(WavelengthAxis::new(vec![400.0, 401.0, 402.0]).unwrap())
    }

    fn meas(i: usize, counts: [f64; 3], power: f64) -> Measurement {
        Measurement {
            label: measurement_label(i),
            photon_counts: counts.to_vec(),
            power_ua: power,
        }
    }

    #[test]
    fn set_computes_means() {
        let set = MeasurementSet::from_measurements(
            axis(),
            vec![meas(0, [1.0, 2.0, 3.0], 10.0), meas(1, [3.0, 4.0, 5.0], 12.0)],
        )
        .unwrap();
        assert_eq!(set.mean_photon_counts(), &[2.0, 3.0, 4.0]);
        assert_relative_eq!(set.mean_power_ua(), 11.0);
    }

    #[test]
    fn columns_end_with_the_mean() {
        let set =
            MeasurementSet::from_measurements(axis(), vec![meas(0, [1.0, 1.0, 1.0], 5.0)]).unwrap();
        let labels: Vec<&str> = set.columns().map(|c| c.label).collect();
        assert_eq!(labels, vec!["meas_0", MEAN_COLUMN]);
        assert!(set.columns().last().unwrap().is_mean);
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(MeasurementSet::from_measurements(axis(), vec![]).is_err());
    }

    #[test]
    fn misaligned_measurement_is_rejected() {
        let bad = Measurement {
            label: "meas_0".into(),
            photon_counts: vec![1.0, 2.0],
            power_ua: 1.0,
        };
        let err = MeasurementSet::from_measurements(axis(), vec![bad.clone()]).unwrap_err();
        match err {
            PlqyError::CalibrationMismatch(msg) => {
                assert!(msg.contains("meas_0 has 2 points"), "{msg}")
            }
            other => panic!("expected a calibration mismatch, got {other:?}"),
        }

        // Stored sets go through the same check.
        assert!(matches!(
            MeasurementSet::from_parts(axis(), vec![bad], vec![1.0, 2.0, 3.0], 1.0),
            Err(PlqyError::CalibrationMismatch(_))
        ));
    }

    #[test]
    fn statistics_helpers() {
        assert_eq!(mean(&[]), None);
        assert_relative_eq!(mean(&[1.0, 2.0, 6.0]).unwrap(), 3.0);
        assert_eq!(sample_std(&[4.0]), None);
        assert_relative_eq!(sample_std(&[2.0, 4.0, 6.0]).unwrap(), 2.0);

        let reading = PowerReading::from_readings(&[10.0, 12.0]).unwrap();
        assert_eq!(reading.readings, 2);
        assert_relative_eq!(reading.mean_ua, 11.0);
        assert!(PowerReading::from_readings(&[]).is_none());
    }
}
