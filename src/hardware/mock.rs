//! Mock Hardware Implementations
//!
//! Provides simulated instruments for testing and for running the acquisition
//! workflow without a spectrometer or multimeter attached.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockSpectrometer` - Simulated array spectrometer with a switchable optical scene
//! - `MockMultimeter` - Simulated DC current meter on the reference photodiode
//!
//! # Optical Model
//!
//! The spectrometer renders a Gaussian excitation line and a Gaussian
//! photoluminescence band on top of a constant detector offset. The sample
//! scene removes `absorbed_fraction` of the excitation line and re-emits it
//! with quantum yield `plqy`, weighted so that the photon-converted pipeline
//! recovers `plqy` when the analysis windows enclose both features.
//!
//! # Performance Characteristics
//!
//! - MockSpectrometer: exposure lasts exactly the integration time
//! - MockMultimeter: 2ms per reading by default

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::hardware::capabilities::{CurrentMeter, Spectrometer};

// =============================================================================
// Shared event log
// =============================================================================

/// Something a mock instrument did, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentEvent {
    /// Spectrometer exposure began.
    ExposureStarted,
    /// Spectrometer exposure returned its data.
    ExposureFinished,
    /// The meter completed one reading (amps).
    CurrentRead(f64),
}

/// Ordered record of events shared between mock instruments.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<InstrumentEvent>>>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, event: InstrumentEvent) {
        self.events.lock().await.push(event);
    }

    /// Copy of all events recorded so far
    pub async fn snapshot(&self) -> Vec<InstrumentEvent> {
        self.events.lock().await.clone()
    }

    /// Forget all recorded events
    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

// =============================================================================
// MockSpectrometer - Simulated Spectrometer
// =============================================================================

/// What the integrating sphere currently contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Illumination {
    /// Excitation source off, no sample
    Dark,
    /// Excitation on, reference blank (e.g. cuvette with solvent)
    Blank,
    /// Excitation on, luminescent sample
    Sample,
}

/// Parameters of the simulated optical signal
#[derive(Debug, Clone, PartialEq)]
pub struct OpticalModel {
    /// Center of the excitation line (nm)
    pub laser_center_nm: f64,
    /// Gaussian width of the excitation line (nm)
    pub laser_sigma_nm: f64,
    /// Excitation peak height per millisecond of integration (counts)
    pub laser_counts_per_ms: f64,
    /// Center of the photoluminescence band (nm)
    pub emission_center_nm: f64,
    /// Gaussian width of the photoluminescence band (nm)
    pub emission_sigma_nm: f64,
    /// Fraction of excitation photons the sample absorbs
    pub absorbed_fraction: f64,
    /// Quantum yield of the simulated sample
    pub plqy: f64,
    /// Constant detector offset (counts)
    pub dark_offset: f64,
    /// Peak-to-peak uniform noise added to every pixel (counts)
    pub noise_counts: f64,
    /// Detector saturation level (counts)
    pub max_counts: f64,
}

impl Default for OpticalModel {
    fn default() -> Self {
        Self {
            laser_center_nm: 405.0,
            laser_sigma_nm: 1.5,
            laser_counts_per_ms: 1000.0,
            emission_center_nm: 600.0,
            emission_sigma_nm: 25.0,
            absorbed_fraction: 0.6,
            plqy: 0.5,
            dark_offset: 950.0,
            noise_counts: 0.0,
            max_counts: 170_000.0,
        }
    }
}

fn gaussian(x: f64, center: f64, sigma: f64) -> f64 {
    (-0.5 * ((x - center) / sigma).powi(2)).exp()
}

impl OpticalModel {
    /// Render one exposure of `integration_us` over `wavelengths`
    pub fn render(
        &self,
        wavelengths: &[f64],
        illumination: Illumination,
        integration_us: u64,
    ) -> Vec<f64> {
        let t_ms = integration_us as f64 / 1000.0;
        let laser: Vec<f64> = wavelengths
            .iter()
            .map(|&w| {
                self.laser_counts_per_ms * t_ms * gaussian(w, self.laser_center_nm, self.laser_sigma_nm)
            })
            .collect();
        let band: Vec<f64> = wavelengths
            .iter()
            .map(|&w| gaussian(w, self.emission_center_nm, self.emission_sigma_nm))
            .collect();

        // Counts scale with wavelength once converted to photons, so balance
        // the two features on sum(counts * wavelength).
        let laser_weight: f64 = laser.iter().zip(wavelengths).map(|(l, w)| l * w).sum();
        let band_weight: f64 = band.iter().zip(wavelengths).map(|(b, w)| b * w).sum();
        let emission_scale = if band_weight > 0.0 {
            self.plqy * self.absorbed_fraction * laser_weight / band_weight
        } else {
            0.0
        };

        let mut rng = rand::thread_rng();
        laser
            .iter()
            .zip(band.iter())
            .map(|(l, b)| {
                let signal = match illumination {
                    Illumination::Dark => 0.0,
                    Illumination::Blank => *l,
                    Illumination::Sample => (1.0 - self.absorbed_fraction) * l + emission_scale * b,
                };
                let noise = if self.noise_counts > 0.0 {
                    rng.gen_range(-0.5..0.5) * self.noise_counts
                } else {
                    0.0
                };
                (self.dark_offset + signal + noise).clamp(0.0, self.max_counts)
            })
            .collect()
    }
}

/// Wavelength axis of the simulated detector: 350-750 nm, slightly non-linear
pub fn mock_wavelengths(pixels: usize) -> Vec<f64> {
    let n = pixels.max(2);
    (0..n)
        .map(|i| {
            let u = i as f64 / (n - 1) as f64;
            350.0 + 400.0 * u - 8.0 * u * (1.0 - u)
        })
        .collect()
}

/// Mock spectrometer with realistic exposure timing
///
/// Simulates a spectrometer with:
/// - Fixed, slightly non-linear wavelength axis
/// - Exposure that takes the full integration time
/// - Switchable scene (dark / blank / sample)
/// - Failure injection for the next exposure or for `close`
///
/// # Example
///
/// ```rust,ignore
/// let spec = MockSpectrometer::new(1044);
/// spec.set_integration_time(5_000).await?;
/// spec.set_illumination(Illumination::Blank).await;
/// let counts = spec.read_intensities().await?; // Takes ~5ms
/// ```
pub struct MockSpectrometer {
    wavelengths: Vec<f64>,
    integration_us: AtomicU64,
    illumination: RwLock<Illumination>,
    model: RwLock<OpticalModel>,
    exposures: AtomicUsize,
    fail_next_exposure: AtomicBool,
    fail_on_close: AtomicBool,
    closed: AtomicBool,
    events: Option<EventLog>,
}

impl MockSpectrometer {
    /// Create a mock spectrometer with `pixels` detector elements
    pub fn new(pixels: usize) -> Self {
        Self {
            wavelengths: mock_wavelengths(pixels),
            integration_us: AtomicU64::new(100_000),
            illumination: RwLock::new(Illumination::Dark),
            model: RwLock::new(OpticalModel::default()),
            exposures: AtomicUsize::new(0),
            fail_next_exposure: AtomicBool::new(false),
            fail_on_close: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: None,
        }
    }

    /// Record exposures into a shared event log
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.events = Some(log);
        self
    }

    /// Replace the optical model
    pub fn with_model(mut self, model: OpticalModel) -> Self {
        self.model = RwLock::new(model);
        self
    }

    /// Change what the detector sees
    pub async fn set_illumination(&self, illumination: Illumination) {
        debug!(?illumination, "MockSpectrometer: scene changed");
        *self.illumination.write().await = illumination;
    }

    /// Current optical model
    pub async fn model(&self) -> OpticalModel {
        self.model.read().await.clone()
    }

    /// Number of exposures completed so far
    pub fn exposure_count(&self) -> usize {
        self.exposures.load(Ordering::SeqCst)
    }

    /// Make the next exposure fail
    pub fn fail_next_exposure(&self) {
        self.fail_next_exposure.store(true, Ordering::SeqCst);
    }

    /// Make `close` return an error
    pub fn fail_on_close(&self) {
        self.fail_on_close.store(true, Ordering::SeqCst);
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn record(&self, event: InstrumentEvent) {
        if let Some(log) = &self.events {
            log.record(event).await;
        }
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new(1044)
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn set_integration_time(&self, micros: u64) -> Result<()> {
        if micros == 0 {
            return Err(anyhow!("MockSpectrometer: integration time must be positive"));
        }
        self.integration_us.store(micros, Ordering::SeqCst);
        Ok(())
    }

    async fn integration_time(&self) -> Result<u64> {
        Ok(self.integration_us.load(Ordering::SeqCst))
    }

    async fn read_intensities(&self) -> Result<Vec<f64>> {
        if self.is_closed() {
            bail!("MockSpectrometer: device is closed");
        }
        let integration_us = self.integration_us.load(Ordering::SeqCst);
        self.record(InstrumentEvent::ExposureStarted).await;

        sleep(Duration::from_micros(integration_us)).await;

        if self.fail_next_exposure.swap(false, Ordering::SeqCst) {
            bail!("MockSpectrometer: simulated USB transfer failure");
        }

        let illumination = *self.illumination.read().await;
        let counts = self
            .model
            .read()
            .await
            .render(&self.wavelengths, illumination, integration_us);
        let n = self.exposures.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(exposure = n, integration_us, "MockSpectrometer: exposure complete");
        self.record(InstrumentEvent::ExposureFinished).await;
        Ok(counts)
    }

    async fn wavelengths(&self) -> Result<Vec<f64>> {
        Ok(self.wavelengths.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_on_close.load(Ordering::SeqCst) {
            bail!("MockSpectrometer: simulated release failure");
        }
        debug!("MockSpectrometer: closed");
        Ok(())
    }
}

// =============================================================================
// MockMultimeter - Simulated DC Current Meter
// =============================================================================

/// Mock multimeter reading the reference photodiode current
///
/// Simulates a meter with:
/// - Configurable base current (amps)
/// - Optional relative noise
/// - Fixed per-reading latency
/// - Failure injection after N readings, or on shutdown
///
/// # Example
///
/// ```rust,ignore
/// let meter = MockMultimeter::new(12.5e-6);
/// let amps = meter.read_current_dc().await?;
/// assert!((amps - 12.5e-6).abs() < 1e-9);
/// ```
pub struct MockMultimeter {
    base_current: RwLock<f64>,
    relative_noise: f64,
    read_latency: Duration,
    reads: AtomicUsize,
    fail_after: AtomicUsize,
    fail_on_shutdown: AtomicBool,
    resets: AtomicUsize,
    shut_down: AtomicBool,
    events: Option<EventLog>,
}

impl MockMultimeter {
    /// Create a meter returning `base_current` amps
    pub fn new(base_current: f64) -> Self {
        Self {
            base_current: RwLock::new(base_current),
            relative_noise: 0.0,
            read_latency: Duration::from_millis(2),
            reads: AtomicUsize::new(0),
            fail_after: AtomicUsize::new(usize::MAX),
            fail_on_shutdown: AtomicBool::new(false),
            resets: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            events: None,
        }
    }

    /// Record readings into a shared event log
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.events = Some(log);
        self
    }

    /// Time each reading takes
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// Uniform relative noise, e.g. 0.01 for ±0.5%
    pub fn with_relative_noise(mut self, relative_noise: f64) -> Self {
        self.relative_noise = relative_noise;
        self
    }

    /// Set the base current reading (amps)
    pub async fn set_base_current(&self, amps: f64) {
        *self.base_current.write().await = amps;
    }

    /// Fail every reading once `reads` readings have succeeded
    pub fn fail_after(&self, reads: usize) {
        self.fail_after.store(reads, Ordering::SeqCst);
    }

    /// Make `shutdown` return an error
    pub fn fail_on_shutdown(&self) {
        self.fail_on_shutdown.store(true, Ordering::SeqCst);
    }

    /// Number of successful readings so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `reset` calls
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn noise_factor(&self) -> f64 {
        if self.relative_noise > 0.0 {
            1.0 + rand::thread_rng().gen_range(-0.5..0.5) * self.relative_noise
        } else {
            1.0
        }
    }
}

impl Default for MockMultimeter {
    fn default() -> Self {
        Self::new(12.5e-6)
    }
}

#[async_trait]
impl CurrentMeter for MockMultimeter {
    async fn read_current_dc(&self) -> Result<f64> {
        if self.is_shut_down() {
            bail!("MockMultimeter: session released");
        }
        sleep(self.read_latency).await;

        if self.reads.load(Ordering::SeqCst) >= self.fail_after.load(Ordering::SeqCst) {
            bail!("MockMultimeter: simulated GPIB timeout");
        }

        let amps = *self.base_current.read().await * self.noise_factor();
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.events {
            log.record(InstrumentEvent::CurrentRead(amps)).await;
        }
        Ok(amps)
    }

    async fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        debug!("MockMultimeter: reset");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        debug!("MockMultimeter: status cleared");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        if self.fail_on_shutdown.load(Ordering::SeqCst) {
            bail!("MockMultimeter: simulated release failure");
        }
        debug!("MockMultimeter: shut down");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn mock_axis_is_strictly_increasing() {
        let w = mock_wavelengths(1044);
        assert_eq!(w.len(), 1044);
        assert!(w.windows(2).all(|p| p[1] > p[0]));
        assert!((w[0] - 350.0).abs() < 1e-9);
        assert!((w[1043] - 750.0).abs() < 1e-9);
    }

    #[test]
    fn dark_scene_is_flat_offset() {
        let model = OpticalModel::default();
        let w = mock_wavelengths(100);
        let dark = model.render(&w, Illumination::Dark, 10_000);
        assert!(dark.iter().all(|&c| (c - model.dark_offset).abs() < 1e-9));
    }

    #[test]
    fn sample_scene_absorbs_excitation() {
        let model = OpticalModel::default();
        let w = mock_wavelengths(1044);
        let peak = |counts: &[f64]| counts.iter().copied().fold(f64::MIN, f64::max);
        let blank = model.render(&w, Illumination::Blank, 10_000);
        let sample = model.render(&w, Illumination::Sample, 10_000);
        assert!(peak(&blank) > peak(&sample));
        // Emission band shows up only in the sample scene
        let i600 = w.iter().position(|&x| x > 600.0).unwrap();
        assert!(sample[i600] > blank[i600]);
    }

    #[tokio::test]
    async fn test_mock_spectrometer_exposure_timing() {
        let spec = MockSpectrometer::new(64);
        spec.set_integration_time(20_000).await.unwrap();

        let start = Instant::now();
        let counts = spec.read_intensities().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(counts.len(), 64);
        assert!(elapsed >= Duration::from_millis(20), "exposure took {elapsed:?}");
        assert_eq!(spec.exposure_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_spectrometer_failure_injection() {
        let spec = MockSpectrometer::new(16);
        spec.set_integration_time(1_000).await.unwrap();
        spec.fail_next_exposure();
        assert!(spec.read_intensities().await.is_err());
        // Only the next exposure fails
        assert!(spec.read_intensities().await.is_ok());

        spec.close().await.unwrap();
        assert!(spec.read_intensities().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_spectrometer_rejects_zero_integration() {
        let spec = MockSpectrometer::new(16);
        assert!(spec.set_integration_time(0).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_multimeter_reads_base_current() {
        let meter = MockMultimeter::new(2.5e-6).with_read_latency(Duration::from_millis(1));
        assert_eq!(meter.read_current_dc().await.unwrap(), 2.5e-6);

        meter.set_base_current(3.0e-6).await;
        assert_eq!(meter.read_current_dc().await.unwrap(), 3.0e-6);
        assert_eq!(meter.read_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_multimeter_fail_after() {
        let meter = MockMultimeter::new(1e-6).with_read_latency(Duration::from_millis(1));
        meter.fail_after(1);
        assert!(meter.read_current_dc().await.is_ok());
        assert!(meter.read_current_dc().await.is_err());
    }

    #[tokio::test]
    async fn test_event_log_orders_both_instruments() {
        let log = EventLog::new();
        let spec = MockSpectrometer::new(8).with_event_log(log.clone());
        let meter = MockMultimeter::new(1e-6)
            .with_read_latency(Duration::from_millis(1))
            .with_event_log(log.clone());
        spec.set_integration_time(1_000).await.unwrap();

        meter.read_current_dc().await.unwrap();
        spec.read_intensities().await.unwrap();

        let events = log.snapshot().await;
        assert_eq!(
            events,
            vec![
                InstrumentEvent::CurrentRead(1e-6),
                InstrumentEvent::ExposureStarted,
                InstrumentEvent::ExposureFinished,
            ]
        );
    }
}
