//! Configuration System using Figment
//!
//! Strongly-typed settings for acquisition and analysis. Loaded from:
//! 1. `config/abs_plqy.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `ABS_PLQY_`, nested with `__`
//!
//! Every field has a serde default, so an empty or missing file yields a
//! working mock setup.
//!
//! # Example
//! ```no_run
//! use abs_plqy::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! tracing::info!(subruns = settings.acquisition.subruns, "settings loaded");
//! # Ok::<(), abs_plqy::error::PlqyError>(())
//! ```
//!
//! Override from the environment:
//! `ABS_PLQY_ACQUISITION__SUBRUNS=5 ABS_PLQY_POWER_METER__BACKEND=agilent34410a`

use crate::analysis::RegionBounds;
use crate::error::{AppResult, PlqyError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/abs_plqy.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ABS_PLQY_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Spectrometer selection and exposure
    pub spectrometer: SpectrometerConfig,
    /// Reference power meter
    pub power_meter: PowerMeterConfig,
    /// Collection sizes and live view
    pub acquisition: AcquisitionConfig,
    /// Default integration windows
    pub analysis: AnalysisConfig,
    /// Artifact locations
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Spectrometer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrometerConfig {
    /// Backend name; only `mock` ships with this crate
    pub backend: String,
    /// Exposure time in milliseconds
    pub integration_time_ms: f64,
    /// Detector saturation level, used to flag live frames
    pub max_counts: f64,
    /// Allowed distance between calibration and instrument wavelengths (nm)
    pub calibration_tolerance_nm: f64,
    /// Pixel count of the simulated detector
    pub mock_pixels: usize,
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            backend: "mock".to_string(),
            integration_time_ms: 100.0,
            max_counts: 170_000.0,
            calibration_tolerance_nm: 0.05,
            mock_pixels: 1044,
        }
    }
}

impl SpectrometerConfig {
    /// Integration time as the spectrometer expects it.
    pub fn integration_time_us(&self) -> u64 {
        (self.integration_time_ms * 1000.0).round() as u64
    }
}

/// Power meter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerMeterConfig {
    /// Backend name (mock, agilent34410a)
    pub backend: String,
    /// `host[:port]` of the LAN SCPI socket
    pub address: String,
    /// Per-command timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Photodiode current returned by the mock meter (amps)
    pub mock_current_a: f64,
}

impl Default for PowerMeterConfig {
    fn default() -> Self {
        Self {
            backend: "mock".to_string(),
            address: "192.168.1.20:5025".to_string(),
            read_timeout_ms: 2000,
            mock_current_a: 12.5e-6,
        }
    }
}

/// Acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Exposures averaged into one measurement
    pub subruns: usize,
    /// Measurements per blank or sample set
    pub measurements: usize,
    /// Live view refresh period in milliseconds
    pub live_view_interval_ms: u64,
    /// Command channel capacity of the controller
    pub command_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            subruns: 1,
            measurements: 2,
            live_view_interval_ms: 500,
            command_capacity: 32,
        }
    }
}

/// Default analysis windows (nm, exclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Excitation window lower bound
    pub excit_lower_bound: f64,
    /// Excitation window upper bound
    pub excit_upper_bound: f64,
    /// Emission window lower bound
    pub pl_lower_bound: f64,
    /// Emission window upper bound
    pub pl_upper_bound: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let [excit_lower_bound, excit_upper_bound, pl_lower_bound, pl_upper_bound] =
            RegionBounds::default().as_array();
        Self {
            excit_lower_bound,
            excit_upper_bound,
            pl_lower_bound,
            pl_upper_bound,
        }
    }
}

impl AnalysisConfig {
    /// The configured windows.
    pub fn bounds(&self) -> RegionBounds {
        RegionBounds::new(
            self.excit_lower_bound,
            self.excit_upper_bound,
            self.pl_lower_bound,
            self.pl_upper_bound,
        )
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for measurement sets
    pub output_dir: PathBuf,
    /// File name suffix of blank sets
    pub blank_name: String,
    /// File name suffix of sample sets
    pub sample_name: String,
    /// Irradiance calibration file; `None` uses a flat curve (mock only)
    pub calibration_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            blank_name: "blank".to_string(),
            sample_name: "sample".to_string(),
            calibration_file: None,
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];
const SPECTROMETER_BACKENDS: [&str; 1] = ["mock"];
const POWER_METER_BACKENDS: [&str; 2] = ["mock", "agilent34410a"];

fn one_of(what: &str, value: &str, valid: &[&str]) -> AppResult<()> {
    if valid.contains(&value) {
        Ok(())
    } else {
        Err(PlqyError::Configuration(format!(
            "Invalid {what} '{value}'. Must be one of: {}",
            valid.join(", ")
        )))
    }
}

impl Settings {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path (missing file = defaults)
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Render as TOML, e.g. to bootstrap a config file
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| PlqyError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        one_of("log_level", &self.application.log_level, &VALID_LOG_LEVELS)?;
        one_of("log_format", &self.application.log_format, &VALID_LOG_FORMATS)?;
        one_of("spectrometer backend", &self.spectrometer.backend, &SPECTROMETER_BACKENDS)?;
        one_of("power meter backend", &self.power_meter.backend, &POWER_METER_BACKENDS)?;

        if self.spectrometer.integration_time_ms.is_nan() || self.spectrometer.integration_time_ms <= 0.0 {
            return Err(PlqyError::Configuration(format!(
                "integration_time_ms must be positive, got {}",
                self.spectrometer.integration_time_ms
            )));
        }
        if self.spectrometer.max_counts.is_nan() || self.spectrometer.max_counts <= 0.0 {
            return Err(PlqyError::Configuration("max_counts must be positive".into()));
        }
        if self.spectrometer.calibration_tolerance_nm.is_nan()
            || self.spectrometer.calibration_tolerance_nm < 0.0
        {
            return Err(PlqyError::Configuration(
                "calibration_tolerance_nm must not be negative".into(),
            ));
        }
        if self.spectrometer.backend == "mock" && self.spectrometer.mock_pixels < 2 {
            return Err(PlqyError::Configuration("mock_pixels must be at least 2".into()));
        }
        if self.acquisition.subruns == 0 {
            return Err(PlqyError::Configuration("subruns must be at least 1".into()));
        }
        if self.acquisition.measurements == 0 {
            return Err(PlqyError::Configuration(
                "measurements must be at least 1".into(),
            ));
        }
        if self.acquisition.live_view_interval_ms == 0 {
            return Err(PlqyError::Configuration(
                "live_view_interval_ms must be positive".into(),
            ));
        }
        if self.acquisition.command_capacity == 0 {
            return Err(PlqyError::Configuration("command_capacity must be positive".into()));
        }

        let a = &self.analysis;
        if a.excit_lower_bound >= a.excit_upper_bound {
            return Err(PlqyError::Configuration(format!(
                "excitation window is empty: {} >= {}",
                a.excit_lower_bound, a.excit_upper_bound
            )));
        }
        if a.pl_lower_bound >= a.pl_upper_bound {
            return Err(PlqyError::Configuration(format!(
                "emission window is empty: {} >= {}",
                a.pl_lower_bound, a.pl_upper_bound
            )));
        }
        if self.storage.blank_name == self.storage.sample_name {
            return Err(PlqyError::Configuration(
                "blank_name and sample_name must differ".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.spectrometer.integration_time_us(), 100_000);
        assert_eq!(settings.analysis.bounds(), RegionBounds::new(400.0, 410.0, 500.0, 710.0));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.acquisition, AcquisitionConfig::default());
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abs_plqy.toml");
        fs::write(
            &path,
            "[acquisition]\nsubruns = 4\n\n[power_meter]\nbackend = \"agilent34410a\"\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.acquisition.subruns, 4);
        assert_eq!(settings.acquisition.measurements, 2);
        assert_eq!(settings.power_meter.backend, "agilent34410a");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abs_plqy.toml");
        let mut settings = Settings::default();
        settings.storage.calibration_file = Some(PathBuf::from("cal/qep.txt"));
        fs::write(&path, settings.to_toml().unwrap()).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn retired_keys_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abs_plqy.toml");
        fs::write(
            &path,
            "[application]\nname = \"Absolute PLQY\"\n\n[spectrometer]\nserial_number = \"QEP01234\"\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings, Settings::default());
        let rendered = settings.to_toml().unwrap();
        assert!(!rendered.contains("serial_number"));
        assert!(!rendered.lines().any(|l| l.starts_with("name =")));
    }

    #[test]
    fn type_errors_are_config_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abs_plqy.toml");
        fs::write(&path, "[acquisition]\nsubruns = \"many\"\n").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(PlqyError::Config(_))));
    }

    #[test]
    fn test_invalid_values() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.acquisition.subruns = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.analysis.excit_lower_bound = 420.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.spectrometer.backend = "qepro".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.spectrometer.integration_time_ms = f64::NAN;
        assert!(settings.validate().is_err());
    }
}
