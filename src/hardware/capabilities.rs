//! Atomic Hardware Capabilities
//!
//! The acquisition pipeline only needs two narrow capabilities:
//!
//! - A spectrometer: [`Spectrometer`] (integration time, one blocking exposure,
//!   fixed wavelength axis)
//! - A power reference: [`CurrentMeter`] (DC current from the Si photodiode)
//!
//! Both are object safe so the controller can hold `Arc<dyn Spectrometer>` and
//! `Arc<dyn CurrentMeter>` regardless of whether real or simulated devices are
//! attached.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE instrument role
//!
//! # Example
//!
//! ```rust,ignore
//! async fn one_exposure<S, M>(spec: &S, meter: &M) -> Result<(Vec<f64>, f64)>
//! where
//!     S: Spectrometer,
//!     M: CurrentMeter,
//! {
//!     spec.set_integration_time(100_000).await?;
//!     let before = meter.read_current_dc().await?;
//!     let counts = spec.read_intensities().await?;
//!     Ok((counts, before))
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Spectrum Acquisition
///
/// Array spectrometers with a fixed wavelength calibration
/// (e.g. Ocean Optics QE Pro).
///
/// # Contract
/// - Integration time is in microseconds
/// - `read_intensities` triggers ONE exposure and returns when it completes;
///   the returned intensities are dark-count corrected by the device
/// - `wavelengths` never changes for a given device
/// - After `close` the device must not be used again
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Set the integration time for the next exposure
    ///
    /// # Arguments
    /// * `micros` - Integration time in microseconds
    ///
    /// # Returns
    /// - Ok(()) if accepted
    /// - Err if the value is outside the device's range
    async fn set_integration_time(&self, micros: u64) -> Result<()>;

    /// Currently configured integration time in microseconds
    async fn integration_time(&self) -> Result<u64>;

    /// Trigger one exposure and read the intensity array
    ///
    /// Blocks (asynchronously) for the full integration time.
    async fn read_intensities(&self) -> Result<Vec<f64>>;

    /// Native wavelength axis in nm, one entry per pixel
    async fn wavelengths(&self) -> Result<Vec<f64>>;

    /// Release the device session
    async fn close(&self) -> Result<()>;
}

/// Capability: DC Current Readout
///
/// Multimeters reading the photocurrent of a reference detector
/// (e.g. Agilent 34410A on a Si photodiode).
///
/// # Contract
/// - `read_current_dc` returns amps
/// - Reading should be fast (<100ms typical); callers poll it in a tight loop
/// - `shutdown` releases the session and must be the last call
#[async_trait]
pub trait CurrentMeter: Send + Sync {
    /// Read one DC current value in amps
    async fn read_current_dc(&self) -> Result<f64>;

    /// Restore the instrument's power-on configuration
    async fn reset(&self) -> Result<()>;

    /// Clear status and error queues
    async fn clear(&self) -> Result<()>;

    /// Release the instrument session
    async fn shutdown(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct FixedSpectrometer {
        integration_us: AtomicU64,
    }

    #[async_trait]
    impl Spectrometer for FixedSpectrometer {
        async fn set_integration_time(&self, micros: u64) -> Result<()> {
            self.integration_us.store(micros, Ordering::SeqCst);
            Ok(())
        }

        async fn integration_time(&self) -> Result<u64> {
            Ok(self.integration_us.load(Ordering::SeqCst))
        }

        async fn read_intensities(&self) -> Result<Vec<f64>> {
            Ok(vec![1.0, 2.0, 3.0])
        }

        async fn wavelengths(&self) -> Result<Vec<f64>> {
            Ok(vec![400.0, 500.0, 600.0])
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FixedMeter;

    #[async_trait]
    impl CurrentMeter for FixedMeter {
        async fn read_current_dc(&self) -> Result<f64> {
            Ok(1.5e-5)
        }

        async fn reset(&self) -> Result<()> {
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn capabilities_are_object_safe() {
        let spec: Arc<dyn Spectrometer> = Arc::new(FixedSpectrometer {
            integration_us: AtomicU64::new(0),
        });
        let meter: Arc<dyn CurrentMeter> = Arc::new(FixedMeter);

        spec.set_integration_time(250_000).await.unwrap();
        assert_eq!(spec.integration_time().await.unwrap(), 250_000);
        assert_eq!(
            spec.read_intensities().await.unwrap().len(),
            spec.wavelengths().await.unwrap().len()
        );
        assert_eq!(meter.read_current_dc().await.unwrap(), 1.5e-5);
    }
}
