//! End-to-end PLQY session against the simulated instruments
//!
//! Drives the acquisition controller through dark, blank and sample
//! collection, then checks the estimate against the quantum yield the mock
//! optical model was built with, and that re-analyzing the persisted files
//! reproduces the live result.

use abs_plqy::analysis::RegionBounds;
use abs_plqy::config::Settings;
use abs_plqy::controller::AcquisitionController;
use abs_plqy::data::report::AnalysisOutcome;
use abs_plqy::data::repository::{MeasurementRepository, Slot};
use abs_plqy::data::storage::load_set;
use abs_plqy::hardware::mock::{Illumination, MockMultimeter, MockSpectrometer, OpticalModel};
use abs_plqy::messages::{CalibrationSource, ControllerState};
use approx::assert_relative_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn settings(output_dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.spectrometer.integration_time_ms = 5.0;
    settings.acquisition.subruns = 2;
    settings.acquisition.measurements = 3;
    settings.storage.output_dir = output_dir.to_path_buf();
    settings
}

#[tokio::test]
async fn test_mock_session_recovers_model_plqy() {
    let dir = tempdir().unwrap();
    let model = OpticalModel {
        plqy: 0.5,
        absorbed_fraction: 0.6,
        ..Default::default()
    };
    let spec = Arc::new(MockSpectrometer::new(1044).with_model(model));
    let meter = Arc::new(MockMultimeter::new(12.5e-6).with_read_latency(Duration::from_millis(1)));

    let controller = AcquisitionController::connect(settings(dir.path()), spec.clone(), meter)
        .await
        .unwrap();
    let (handle, task) = controller.spawn();

    handle
        .load_calibration(CalibrationSource::Uniform(1.0))
        .await
        .unwrap();

    spec.set_illumination(Illumination::Dark).await;
    handle.collect_dark().await.unwrap();
    spec.set_illumination(Illumination::Blank).await;
    let blank = handle.collect_set(Slot::Blank).await.unwrap();
    spec.set_illumination(Illumination::Sample).await;
    let sample = handle.collect_set(Slot::Sample).await.unwrap();

    // 1 dark + 3 blank + 3 sample measurements, 2 subruns each
    assert_eq!(spec.exposure_count(), 14);
    assert_eq!(blank.measurements, 3);
    assert_relative_eq!(sample.mean_power_ua, 12.5, epsilon = 1e-9);

    let outcome = handle.analyze(RegionBounds::default()).await.unwrap();
    let result = &outcome.result;
    assert!(result.is_clean(), "unexpected flags: {:?}", result.flags);
    assert!(
        (result.plqy - 0.5).abs() < 0.03,
        "PLQY {} too far from 0.5",
        result.plqy
    );
    // Noise-free instruments give identical replicates.
    assert!(result.plqy_std < 1e-9);
    assert!(result.photons_absorbed > 0.0);

    let report = handle.save_analysis(RegionBounds::default()).await.unwrap();
    assert!(report.starts_with(sample.path.parent().unwrap()));

    handle.shutdown().await;
    task.await.unwrap();
    assert_eq!(handle.state(), ControllerState::ShutDown);

    // Offline re-analysis of the persisted files gives the same numbers.
    let mut repository = MeasurementRepository::new();
    repository.load_file(Slot::Blank, &blank.path).unwrap();
    repository.load_file(Slot::Sample, &sample.path).unwrap();
    let offline = AnalysisOutcome::compute(&repository, &RegionBounds::default()).unwrap();
    assert_relative_eq!(offline.result.plqy, result.plqy, max_relative = 1e-12);
    assert_relative_eq!(
        offline.result.photons_emitted,
        result.photons_emitted,
        max_relative = 1e-12
    );
}

#[tokio::test]
async fn test_persisted_set_names_follow_storage_config() {
    let dir = tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.acquisition.subruns = 1;
    settings.acquisition.measurements = 1;
    settings.storage.blank_name = "toluene".into();

    let spec = Arc::new(MockSpectrometer::new(64));
    let meter = Arc::new(MockMultimeter::new(5e-6).with_read_latency(Duration::from_millis(1)));
    let (handle, task) = AcquisitionController::connect(settings, spec.clone(), meter)
        .await
        .unwrap()
        .spawn();

    handle
        .load_calibration(CalibrationSource::Uniform(2.0))
        .await
        .unwrap();
    handle.collect_dark().await.unwrap();
    spec.set_illumination(Illumination::Blank).await;
    let blank = handle.collect_set(Slot::Blank).await.unwrap();

    let file_name = blank.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.ends_with("_toluene.csv"), "{file_name}");
    assert!(blank.path.starts_with(dir.path()));

    let set = load_set(&blank.path).unwrap();
    assert_eq!(set.measurements().len(), 1);
    assert_eq!(set.axis().len(), 64);
    assert_relative_eq!(set.mean_power_ua(), 5.0, epsilon = 1e-9);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_failed_collection_leaves_controller_usable() {
    let dir = tempdir().unwrap();
    let spec = Arc::new(MockSpectrometer::new(64));
    let meter = Arc::new(MockMultimeter::new(5e-6).with_read_latency(Duration::from_millis(1)));
    let (handle, task) = AcquisitionController::connect(settings(dir.path()), spec.clone(), meter)
        .await
        .unwrap()
        .spawn();

    spec.fail_next_exposure();
    assert!(handle.collect_dark().await.is_err());
    assert_eq!(handle.state(), ControllerState::Idle);

    // The next attempt goes through on the same instruments.
    handle.collect_dark().await.unwrap();

    handle.shutdown().await;
    task.await.unwrap();
    assert!(spec.is_closed());
}
