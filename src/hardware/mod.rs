//! Hardware Layer
//!
//! Capability traits for the two instruments of the PLQY setup, their
//! simulated implementations, and the LAN driver for the reference multimeter.
//!
//! [`open_instruments`] maps the configured backends onto trait objects.

pub mod agilent_34410a;
pub mod capabilities;
pub mod mock;

pub use capabilities::{CurrentMeter, Spectrometer};

use crate::config::Settings;
use crate::error::{AppResult, PlqyError};
use agilent_34410a::Agilent34410ADriver;
use mock::{MockMultimeter, MockSpectrometer};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Instruments selected by the configuration.
pub struct Instruments {
    /// Spectrometer behind its capability trait.
    pub spectrometer: Arc<dyn Spectrometer>,
    /// Power meter behind its capability trait.
    pub meter: Arc<dyn CurrentMeter>,
    /// Concrete handle when the spectrometer is simulated, so the caller
    /// can switch what the detector sees.
    pub mock_spectrometer: Option<Arc<MockSpectrometer>>,
}

/// Open the configured spectrometer and power meter.
pub async fn open_instruments(settings: &Settings) -> AppResult<Instruments> {
    let (spectrometer, mock_spectrometer): (Arc<dyn Spectrometer>, _) =
        match settings.spectrometer.backend.as_str() {
            "mock" => {
                let mock = Arc::new(MockSpectrometer::new(settings.spectrometer.mock_pixels));
                (mock.clone(), Some(mock))
            }
            other => {
                return Err(PlqyError::Configuration(format!(
                    "unsupported spectrometer backend '{other}'"
                )))
            }
        };

    let meter: Arc<dyn CurrentMeter> = match settings.power_meter.backend.as_str() {
        "mock" => Arc::new(MockMultimeter::new(settings.power_meter.mock_current_a)),
        "agilent34410a" => {
            let timeout = Duration::from_millis(settings.power_meter.read_timeout_ms);
            let driver =
                Agilent34410ADriver::connect_with_timeout(&settings.power_meter.address, timeout)
                    .await
                    .map_err(PlqyError::instrument)?;
            let idn = driver.identify().await.map_err(PlqyError::instrument)?;
            info!(idn = %idn.trim(), "power meter connected");
            Arc::new(driver)
        }
        other => {
            return Err(PlqyError::Configuration(format!(
                "unsupported power meter backend '{other}'"
            )))
        }
    };

    info!(
        spectrometer = %settings.spectrometer.backend,
        power_meter = %settings.power_meter.backend,
        "instruments opened"
    );
    Ok(Instruments {
        spectrometer,
        meter,
        mock_spectrometer,
    })
}
