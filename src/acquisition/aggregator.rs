//! Measurement sets: repeated, calibrated, averaged, persisted.

use crate::acquisition::averager::SubrunAverager;
use crate::analysis::convert;
use crate::data::storage::MeasurementStore;
use crate::error::{AppResult, PlqyError};
use crate::measurement::{measurement_label, Measurement, MeasurementSet};
use crate::spectrum::{CalibrationCurve, DarkSpectrum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// Builds a [`MeasurementSet`] from `measurements` calibrated averages.
pub struct MeasurementAggregator<'a> {
    averager: &'a SubrunAverager,
    dark: &'a DarkSpectrum,
    calibration: &'a CalibrationCurve,
    tolerance_nm: f64,
}

impl<'a> MeasurementAggregator<'a> {
    /// Aggregator converting with `dark` and `calibration`.
    pub fn new(
        averager: &'a SubrunAverager,
        dark: &'a DarkSpectrum,
        calibration: &'a CalibrationCurve,
        tolerance_nm: f64,
    ) -> Self {
        Self {
            averager,
            dark,
            calibration,
            tolerance_nm,
        }
    }

    /// Collect and convert `measurements` subrun averages.
    #[instrument(skip(self))]
    pub async fn collect_set(&self, measurements: usize, subruns: usize) -> AppResult<MeasurementSet> {
        if measurements == 0 {
            return Err(PlqyError::Configuration(
                "measurements must be at least 1".into(),
            ));
        }
        // Fail before the first exposure rather than after it.
        self.dark.check_axis(self.averager.axis())?;
        self.calibration
            .check_alignment(self.averager.axis(), self.tolerance_nm)?;

        let mut collected = Vec::with_capacity(measurements);
        for i in 0..measurements {
            info!(measurement = i + 1, total = measurements, "collecting measurement");
            let (raw, power) = self.averager.collect(subruns).await?;
            let photon_counts = convert(&raw, self.dark, self.calibration, self.tolerance_nm)?;
            collected.push(Measurement {
                label: measurement_label(i),
                photon_counts: photon_counts.into_values(),
                power_ua: power.mean_ua,
            });
        }
        MeasurementSet::from_measurements(Arc::clone(self.averager.axis()), collected)
    }

    /// [`collect_set`](Self::collect_set), then persist the set as `name`.
    pub async fn collect_and_persist(
        &self,
        measurements: usize,
        subruns: usize,
        store: &MeasurementStore,
        name: &str,
    ) -> AppResult<(MeasurementSet, PathBuf)> {
        let set = self.collect_set(measurements, subruns).await?;
        let path = store.persist(&set, name)?;
        Ok((set, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::sampler::SynchronizedSampler;
    use crate::data::storage::load_set;
    use crate::hardware::mock::{Illumination, MockMultimeter, MockSpectrometer};
    use crate::hardware::Spectrometer;
    use crate::measurement::MEAN_COLUMN;
    use crate::spectrum::{Spectrum, WavelengthAxis};
    use approx::assert_relative_eq;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn setup() -> (Arc<MockSpectrometer>, SubrunAverager, DarkSpectrum) {
        let spec = Arc::new(MockSpectrometer::new(128));
        spec.set_integration_time(2_000).await.unwrap();
        let meter =
            Arc::new(MockMultimeter::new(10e-6).with_read_latency(Duration::from_millis(1)));
        let axis = Arc::new(WavelengthAxis::new(spec.wavelengths().await.unwrap()).unwrap());
        let averager = SubrunAverager::new(SynchronizedSampler::new(spec.clone(), meter), axis);

        let (dark, _) = averager.collect(1).await.unwrap();
        (spec, averager, DarkSpectrum::new(dark))
    }

    #[tokio::test]
    async fn collects_labelled_measurements_and_means() {
        let (spec, averager, dark) = setup().await;
        spec.set_illumination(Illumination::Blank).await;
        let calibration = CalibrationCurve::uniform(128, 1.0);
        let aggregator = MeasurementAggregator::new(&averager, &dark, &calibration, 0.1);

        let set = aggregator.collect_set(3, 2).await.unwrap();
        let labels: Vec<&str> = set.columns().map(|c| c.label).collect();
        assert_eq!(labels, vec!["meas_0", "meas_1", "meas_2", MEAN_COLUMN]);
        assert_relative_eq!(set.mean_power_ua(), 10.0, epsilon = 1e-9);
        // 1 dark + 3 x 2 subruns
        assert_eq!(spec.exposure_count(), 7);
        // Dark subtracted: no signal far from the laser line
        let far = set.axis().nearest_index(700.0);
        assert!(set.mean_photon_counts()[far].abs() < 1e-6);
    }

    #[tokio::test]
    async fn persists_immediately() {
        let (spec, averager, dark) = setup().await;
        spec.set_illumination(Illumination::Sample).await;
        let calibration = CalibrationCurve::uniform(128, 2.0);
        let aggregator = MeasurementAggregator::new(&averager, &dark, &calibration, 0.1);
        let dir = tempdir().unwrap();
        let store = MeasurementStore::new(dir.path());

        let (set, path) = aggregator
            .collect_and_persist(2, 1, &store, "sample")
            .await
            .unwrap();
        assert_eq!(load_set(&path).unwrap(), set);
    }

    #[tokio::test]
    async fn misaligned_calibration_fails_before_exposing() {
        let (spec, averager, dark) = setup().await;
        let calibration = CalibrationCurve::uniform(100, 1.0);
        let aggregator = MeasurementAggregator::new(&averager, &dark, &calibration, 0.1);
        let before = spec.exposure_count();

        assert!(matches!(
            aggregator.collect_set(1, 1).await,
            Err(PlqyError::CalibrationMismatch(_))
        ));
        assert_eq!(spec.exposure_count(), before);
    }

    #[tokio::test]
    async fn dark_from_other_axis_fails_before_exposing() {
        let (spec, averager, _) = setup().await;
        let other = Arc::new(WavelengthAxis::new((0..128).map(|i| i as f64).collect()).unwrap());
        let dark = DarkSpectrum::new(Spectrum::new(other, vec![0.0; 128]).unwrap());
        let calibration = CalibrationCurve::uniform(128, 1.0);
        let aggregator = MeasurementAggregator::new(&averager, &dark, &calibration, 0.1);
        let before = spec.exposure_count();

        assert!(matches!(
            aggregator.collect_set(3, 2).await,
            Err(PlqyError::CalibrationMismatch(_))
        ));
        assert_eq!(spec.exposure_count(), before);
    }
}
