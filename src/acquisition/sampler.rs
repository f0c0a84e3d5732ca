//! Synchronized exposure and power sampling.
//!
//! One sample is one spectrometer exposure with the power meter polled
//! continuously underneath it. The two run concurrently:
//!
//! ```text
//! caller                         poller task
//! ------                         -----------
//! spawn poller        ------->   ack "started"
//! await started       <-------
//! read_intensities()             read, read, read ...
//! send stop           ------->   (checked between reads)
//! await JoinHandle    <-------   return readings
//! ```
//!
//! The poller's `JoinHandle` is the result future, so [`SynchronizedSampler::sample`]
//! cannot return before both the exposure and the poll loop have finished. A
//! reading in flight when stop arrives always completes; the worst-case slack
//! is one meter read.

use crate::error::{AppResult, PlqyError};
use crate::hardware::{CurrentMeter, Spectrometer};
use crate::measurement::PowerReading;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) const AMPS_TO_MICROAMPS: f64 = 1e6;

/// Background loop reading the power meter until told to stop.
pub struct PowerPoller {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<Vec<f64>>>,
}

impl PowerPoller {
    /// Spawn the poll loop and wait until it is running.
    ///
    /// Every reading (µA) is also published on `live_current` when given.
    pub async fn start(
        meter: Arc<dyn CurrentMeter>,
        live_current: Option<Arc<watch::Sender<Option<f64>>>>,
    ) -> AppResult<Self> {
        let (started_tx, started_rx) = oneshot::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = started_tx.send(());
            let mut readings = Vec::new();
            loop {
                let amps = meter
                    .read_current_dc()
                    .await
                    .with_context(|| format!("power meter read {} failed", readings.len() + 1))?;
                let micro_amps = amps * AMPS_TO_MICROAMPS;
                readings.push(micro_amps);
                if let Some(tx) = &live_current {
                    tx.send_replace(Some(micro_amps));
                }
                // Stop requested, or the sampler went away.
                if !matches!(stop_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                    break;
                }
            }
            Ok(readings)
        });

        started_rx
            .await
            .map_err(|_| PlqyError::Instrument("power poller exited before starting".into()))?;
        Ok(Self { stop_tx, handle })
    }

    /// Signal stop, wait for the loop to finish, and reduce the readings.
    pub async fn stop(self) -> AppResult<PowerReading> {
        // The task may already have ended on a read error; that error is
        // reported through the join below.
        let _ = self.stop_tx.send(());
        let readings = self
            .handle
            .await
            .map_err(|e| PlqyError::Instrument(format!("power poller task failed: {e}")))?
            .map_err(PlqyError::instrument)?;
        debug!(readings = readings.len(), "power poller stopped");
        PowerReading::from_readings(&readings).ok_or(PlqyError::NoPowerReadings)
    }
}

/// Pairs one spectrometer exposure with the mean power measured during it.
#[derive(Clone)]
pub struct SynchronizedSampler {
    spectrometer: Arc<dyn Spectrometer>,
    meter: Arc<dyn CurrentMeter>,
    live_current: Option<Arc<watch::Sender<Option<f64>>>>,
}

impl SynchronizedSampler {
    /// Sampler over the given instruments.
    pub fn new(spectrometer: Arc<dyn Spectrometer>, meter: Arc<dyn CurrentMeter>) -> Self {
        Self {
            spectrometer,
            meter,
            live_current: None,
        }
    }

    /// Publish every power reading (µA) on `tx`.
    pub fn with_live_current(mut self, tx: watch::Sender<Option<f64>>) -> Self {
        self.live_current = Some(Arc::new(tx));
        self
    }

    /// Publish a reading taken outside [`sample`](Self::sample), e.g. by live view.
    pub fn publish_current(&self, micro_amps: f64) {
        if let Some(tx) = &self.live_current {
            tx.send_replace(Some(micro_amps));
        }
    }

    /// Receiver for the published current.
    ///
    /// Without a live-current channel the receiver never changes from `None`.
    pub fn subscribe_current(&self) -> watch::Receiver<Option<f64>> {
        match &self.live_current {
            Some(tx) => tx.subscribe(),
            None => watch::channel(None).1,
        }
    }

    /// The power meter being polled.
    pub fn meter(&self) -> &Arc<dyn CurrentMeter> {
        &self.meter
    }

    /// The spectrometer being sampled.
    pub fn spectrometer(&self) -> &Arc<dyn Spectrometer> {
        &self.spectrometer
    }

    /// Take one exposure at the configured integration time.
    ///
    /// Returns the raw intensities and the mean power. On an exposure failure
    /// the poller is still stopped and joined before the error is returned.
    pub async fn sample(&self) -> AppResult<(Vec<f64>, PowerReading)> {
        let poller = PowerPoller::start(Arc::clone(&self.meter), self.live_current.clone()).await?;

        let exposure = self.spectrometer.read_intensities().await;
        let power = poller.stop().await;

        let counts = exposure
            .context("spectrometer exposure failed")
            .map_err(PlqyError::instrument)?;
        let power = power.inspect_err(|e| warn!(error = %e, "power sampling failed"))?;
        debug!(
            points = counts.len(),
            power_ua = power.mean_ua,
            readings = power.readings,
            "sample complete"
        );
        Ok((counts, power))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{EventLog, InstrumentEvent, MockMultimeter, MockSpectrometer};
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn instruments(log: &EventLog) -> (Arc<MockSpectrometer>, Arc<MockMultimeter>) {
        let spec = Arc::new(MockSpectrometer::new(32).with_event_log(log.clone()));
        let meter = Arc::new(
            MockMultimeter::new(12.5e-6)
                .with_read_latency(Duration::from_millis(2))
                .with_event_log(log.clone()),
        );
        (spec, meter)
    }

    #[tokio::test]
    async fn sample_waits_for_exposure_and_poll_stop() {
        let log = EventLog::new();
        let (spec, meter) = instruments(&log);
        spec.set_integration_time(20_000).await.unwrap();
        let sampler = SynchronizedSampler::new(spec.clone(), meter.clone());

        let (counts, power) = sampler.sample().await.unwrap();
        assert_eq!(counts.len(), 32);
        assert_relative_eq!(power.mean_ua, 12.5, epsilon = 1e-9);
        assert_eq!(power.readings, meter.read_count());

        // Nothing is read after sample() returned.
        let reads_at_return = meter.read_count();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(meter.read_count(), reads_at_return);

        let events = log.snapshot().await;
        let started = events
            .iter()
            .position(|e| *e == InstrumentEvent::ExposureStarted)
            .unwrap();
        let finished = events
            .iter()
            .position(|e| *e == InstrumentEvent::ExposureFinished)
            .unwrap();
        assert!(started < finished);
        // The meter kept reading while the exposure was open.
        let reads_during = events[started..finished]
            .iter()
            .filter(|e| matches!(e, InstrumentEvent::CurrentRead(_)))
            .count();
        assert!(reads_during >= 2, "only {reads_during} reads during exposure");
    }

    #[tokio::test]
    async fn short_exposure_still_gets_one_reading() {
        let log = EventLog::new();
        let (spec, meter) = instruments(&log);
        spec.set_integration_time(1).await.unwrap();
        let sampler = SynchronizedSampler::new(spec, meter);

        let (_, power) = sampler.sample().await.unwrap();
        assert!(power.readings >= 1);
    }

    #[tokio::test]
    async fn meter_failure_surfaces_after_exposure() {
        let log = EventLog::new();
        let (spec, meter) = instruments(&log);
        spec.set_integration_time(10_000).await.unwrap();
        meter.fail_after(1);
        let sampler = SynchronizedSampler::new(spec.clone(), meter);

        let err = sampler.sample().await.unwrap_err();
        assert!(matches!(err, PlqyError::Instrument(_)));
        assert!(err.to_string().contains("power meter read"));
        assert_eq!(spec.exposure_count(), 1);
    }

    #[tokio::test]
    async fn exposure_failure_stops_the_poller() {
        let log = EventLog::new();
        let (spec, meter) = instruments(&log);
        spec.set_integration_time(5_000).await.unwrap();
        spec.fail_next_exposure();
        let sampler = SynchronizedSampler::new(spec.clone(), meter.clone());

        let err = sampler.sample().await.unwrap_err();
        assert!(err.to_string().contains("spectrometer exposure failed"));

        let reads = meter.read_count();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(meter.read_count(), reads, "poller kept running");

        // Both instruments stay usable.
        assert!(sampler.sample().await.is_ok());
    }

    #[tokio::test]
    async fn live_current_is_published() {
        let log = EventLog::new();
        let (spec, meter) = instruments(&log);
        spec.set_integration_time(5_000).await.unwrap();
        let (tx, rx) = watch::channel(None);
        let sampler = SynchronizedSampler::new(spec, meter).with_live_current(tx);

        sampler.sample().await.unwrap();
        let latest = *rx.borrow();
        assert_relative_eq!(latest.unwrap(), 12.5, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn poller_stop_without_exposure() {
        let meter: Arc<dyn CurrentMeter> = Arc::new(
            MockMultimeter::new(1e-6).with_read_latency(Duration::from_millis(1)),
        );
        let poller = PowerPoller::start(meter, None).await.unwrap();
        let reading = poller.stop().await.unwrap();
        assert!(reading.readings >= 1);
        assert_relative_eq!(reading.mean_ua, 1.0, epsilon = 1e-9);
    }
}
