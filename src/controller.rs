//! Acquisition controller actor.
//!
//! The [`AcquisitionController`] is the single owner of both instruments, the
//! session prerequisites (dark spectrum, calibration curve) and the
//! blank/sample repository. It runs in a dedicated Tokio task and processes
//! [`ControllerCommand`] messages sequentially, answering on oneshot channels.
//!
//! ## State Machine
//!
//! ```text
//!            start_live_view
//!    Idle  ------------------>  LiveView
//!     ^    <------------------    |
//!     |       stop_live_view      |
//!     |                           |
//!     +-----> Collecting <--------+
//!        (returns to the state it came from)
//!
//!    any ---- shutdown ----> ShutDown
//! ```
//!
//! Live-view frames are produced by the task's own interval tick, which is
//! only polled while the task is idle in its event loop. A collection runs
//! inside the command handler, so live view and collection never overlap.
//!
//! ## Graceful Shutdown Protocol
//!
//! 1. Actor receives `ControllerCommand::Shutdown` (or every handle is dropped)
//! 2. Live view stops
//! 3. The spectrometer is closed, then the meter is shut down
//! 4. Release failures are logged and swallowed
//! 5. State becomes `ShutDown` and the event loop exits
//!
//! # Example
//!
//! ```no_run
//! use abs_plqy::{config::Settings, controller::AcquisitionController, hardware};
//! use abs_plqy::data::repository::Slot;
//!
//! # async fn example() -> abs_plqy::error::AppResult<()> {
//! let settings = Settings::default();
//! let instruments = hardware::open_instruments(&settings).await?;
//! let controller =
//!     AcquisitionController::connect(settings, instruments.spectrometer, instruments.meter).await?;
//! let (handle, task) = controller.spawn();
//!
//! handle.collect_dark().await?;
//! let blank = handle.collect_set(Slot::Blank).await?;
//! handle.shutdown().await;
//! let _ = task.await;
//! # Ok(())
//! # }
//! ```

use crate::acquisition::sampler::AMPS_TO_MICROAMPS;
use crate::acquisition::{MeasurementAggregator, SubrunAverager, SynchronizedSampler};
use crate::analysis::RegionBounds;
use crate::config::Settings;
use crate::data::calibration::load_calibration;
use crate::data::report::AnalysisOutcome;
use crate::data::repository::{MeasurementRepository, Slot};
use crate::data::storage::MeasurementStore;
use crate::error::{AppResult, PlqyError};
use crate::hardware::{CurrentMeter, Spectrometer};
use crate::measurement::MeasurementSet;
use crate::messages::{
    CalibrationSource, CollectedSet, CollectionKind, ControllerCommand, ControllerState, LiveFrame,
};
use crate::spectrum::{CalibrationCurve, DarkSpectrum, WavelengthAxis};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Owns the instruments and session state; see the module docs.
pub struct AcquisitionController {
    settings: Settings,
    averager: SubrunAverager,
    dark: Option<DarkSpectrum>,
    calibration: Option<CalibrationCurve>,
    repository: MeasurementRepository,
    store: MeasurementStore,
    state: ControllerState,
    state_tx: watch::Sender<ControllerState>,
    frame_tx: watch::Sender<Option<LiveFrame>>,
    frame_sequence: u64,
}

impl AcquisitionController {
    /// Initialize both instruments and capture the wavelength axis.
    ///
    /// Sets the configured integration time, resets and clears the meter.
    pub async fn connect(
        settings: Settings,
        spectrometer: Arc<dyn Spectrometer>,
        meter: Arc<dyn CurrentMeter>,
    ) -> AppResult<Self> {
        settings.validate()?;
        let wavelengths = spectrometer
            .wavelengths()
            .await
            .context("reading the spectrometer wavelength axis")
            .map_err(PlqyError::instrument)?;
        let axis = Arc::new(WavelengthAxis::new(wavelengths)?);
        spectrometer
            .set_integration_time(settings.spectrometer.integration_time_us())
            .await
            .context("setting the integration time")
            .map_err(PlqyError::instrument)?;
        meter
            .reset()
            .await
            .context("resetting the power meter")
            .map_err(PlqyError::instrument)?;
        meter
            .clear()
            .await
            .context("clearing the power meter")
            .map_err(PlqyError::instrument)?;
        let (first, last) = axis.range();
        info!(points = axis.len(), first, last, "instruments initialized");

        let (current_tx, _) = watch::channel(None);
        let sampler = SynchronizedSampler::new(spectrometer, meter).with_live_current(current_tx);
        let (state_tx, _) = watch::channel(ControllerState::Idle);
        let (frame_tx, _) = watch::channel(None);
        let store = MeasurementStore::new(settings.storage.output_dir.clone());

        Ok(Self {
            settings,
            averager: SubrunAverager::new(sampler, axis),
            dark: None,
            calibration: None,
            repository: MeasurementRepository::new(),
            store,
            state: ControllerState::Idle,
            state_tx,
            frame_tx,
            frame_sequence: 0,
        })
    }

    /// The instrument's wavelength axis.
    pub fn axis(&self) -> &Arc<WavelengthAxis> {
        self.averager.axis()
    }

    /// Start the actor task.
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.settings.acquisition.command_capacity);
        let handle = ControllerHandle {
            commands: tx,
            state: self.state_tx.subscribe(),
            frames: self.frame_tx.subscribe(),
            current: self.averager.sampler().subscribe_current(),
        };
        (handle, tokio::spawn(self.run(rx)))
    }

    /// Event loop: commands, plus the live-view tick while in LiveView.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ControllerCommand>) {
        let period = Duration::from_millis(self.settings.acquisition.live_view_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ControllerCommand::Shutdown { respond_to }) => {
                        self.shutdown().await;
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        debug!("all controller handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                _ = ticker.tick(), if self.state == ControllerState::LiveView => {
                    self.live_tick().await;
                }
            }
        }
        info!("acquisition controller stopped");
    }

    async fn handle(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::SetIntegrationTime { micros, respond_to } => {
                let _ = respond_to.send(self.set_integration_time(micros).await);
            }
            ControllerCommand::StartLiveView { respond_to } => {
                let _ = respond_to.send(self.transition_live_view(true));
            }
            ControllerCommand::StopLiveView { respond_to } => {
                let _ = respond_to.send(self.transition_live_view(false));
            }
            ControllerCommand::LoadCalibration { source, respond_to } => {
                let _ = respond_to.send(self.load_calibration(source));
            }
            ControllerCommand::CollectDark { respond_to } => {
                let _ = respond_to.send(self.collect_dark().await);
            }
            ControllerCommand::CollectSet { slot, respond_to } => {
                let _ = respond_to.send(self.collect_set(slot).await);
            }
            ControllerCommand::LoadSet {
                slot,
                path,
                respond_to,
            } => {
                let result = self.repository.load_file(slot, &path).map(|_| ());
                let _ = respond_to.send(result);
            }
            ControllerCommand::Analyze { bounds, respond_to } => {
                let _ = respond_to.send(AnalysisOutcome::compute(&self.repository, &bounds));
            }
            ControllerCommand::SaveAnalysis { bounds, respond_to } => {
                let result = AnalysisOutcome::compute(&self.repository, &bounds)
                    .and_then(|outcome| outcome.save());
                let _ = respond_to.send(result);
            }
            ControllerCommand::Shutdown { respond_to } => {
                // Handled in run(); kept total for direct callers.
                self.shutdown().await;
                let _ = respond_to.send(());
            }
        }
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "controller state change");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn transition_live_view(&mut self, on: bool) -> AppResult<()> {
        match (self.state, on) {
            (ControllerState::Idle, true) => {
                info!("live view started");
                self.set_state(ControllerState::LiveView);
                Ok(())
            }
            (ControllerState::LiveView, false) => {
                info!("live view stopped");
                self.set_state(ControllerState::Idle);
                Ok(())
            }
            // Already in the requested state.
            (ControllerState::LiveView, true) | (ControllerState::Idle, false) => Ok(()),
            (ControllerState::Collecting(kind), _) => {
                Err(PlqyError::Busy(format!("{kind} collection in progress")))
            }
            (ControllerState::ShutDown, _) => Err(PlqyError::ShutDown),
        }
    }

    fn begin_collection(&mut self, kind: CollectionKind) -> AppResult<ControllerState> {
        match self.state {
            ControllerState::Idle | ControllerState::LiveView => {
                let previous = self.state;
                self.set_state(ControllerState::Collecting(kind));
                Ok(previous)
            }
            ControllerState::Collecting(running) => {
                Err(PlqyError::Busy(format!("{running} collection in progress")))
            }
            ControllerState::ShutDown => Err(PlqyError::ShutDown),
        }
    }

    async fn set_integration_time(&mut self, micros: u64) -> AppResult<()> {
        if self.state == ControllerState::ShutDown {
            return Err(PlqyError::ShutDown);
        }
        self.averager
            .sampler()
            .spectrometer()
            .set_integration_time(micros)
            .await
            .context("setting the integration time")
            .map_err(PlqyError::instrument)?;
        self.settings.spectrometer.integration_time_ms = micros as f64 / 1000.0;
        info!(micros, "integration time changed");
        Ok(())
    }

    fn load_calibration(&mut self, source: CalibrationSource) -> AppResult<()> {
        let curve = match source {
            CalibrationSource::File(path) => load_calibration(&path)?,
            CalibrationSource::Uniform(factor) => CalibrationCurve::uniform(self.axis().len(), factor),
        };
        curve.check_alignment(self.axis(), self.settings.spectrometer.calibration_tolerance_nm)?;
        self.calibration = Some(curve);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn collect_dark(&mut self) -> AppResult<()> {
        let previous = self.begin_collection(CollectionKind::Dark)?;
        let result = self
            .averager
            .collect(self.settings.acquisition.subruns)
            .await;
        self.set_state(previous);

        let (spectrum, _) = result?;
        info!(peak = spectrum.peak(), "dark spectrum captured");
        self.dark = Some(DarkSpectrum::new(spectrum));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn collect_set(&mut self, slot: Slot) -> AppResult<CollectedSet> {
        let previous = self.begin_collection(CollectionKind::Set(slot))?;
        let result = self.aggregate_set(slot).await;
        self.set_state(previous);

        let (set, path) = result?;
        let collected = CollectedSet {
            slot,
            path: path.clone(),
            measurements: set.measurements().len(),
            mean_power_ua: set.mean_power_ua(),
        };
        self.repository.put(slot, set, Some(path));
        Ok(collected)
    }

    async fn aggregate_set(&self, slot: Slot) -> AppResult<(MeasurementSet, PathBuf)> {
        let dark = self
            .dark
            .as_ref()
            .ok_or(PlqyError::MissingPrerequisite("dark spectrum"))?;
        let calibration = self
            .calibration
            .as_ref()
            .ok_or(PlqyError::MissingPrerequisite("calibration curve"))?;
        let name = match slot {
            Slot::Blank => self.settings.storage.blank_name.as_str(),
            Slot::Sample => self.settings.storage.sample_name.as_str(),
        };
        MeasurementAggregator::new(
            &self.averager,
            dark,
            calibration,
            self.settings.spectrometer.calibration_tolerance_nm,
        )
        .collect_and_persist(
            self.settings.acquisition.measurements,
            self.settings.acquisition.subruns,
            &self.store,
            name,
        )
        .await
    }

    async fn live_tick(&mut self) {
        let sampler = self.averager.sampler();
        let counts = match sampler.spectrometer().read_intensities().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "live view exposure failed");
                return;
            }
        };
        let current_ua = match sampler.meter().read_current_dc().await {
            Ok(amps) => {
                let ua = amps * AMPS_TO_MICROAMPS;
                sampler.publish_current(ua);
                Some(ua)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "live view power read failed");
                None
            }
        };

        let peak = counts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let saturated = peak >= self.settings.spectrometer.max_counts;
        if saturated {
            warn!(peak, max_counts = self.settings.spectrometer.max_counts, "detector saturated");
        }
        self.frame_sequence += 1;
        self.frame_tx.send_replace(Some(LiveFrame {
            sequence: self.frame_sequence,
            counts,
            peak,
            saturated,
            current_ua,
        }));
    }

    async fn shutdown(&mut self) {
        if self.state == ControllerState::ShutDown {
            return;
        }
        if self.state == ControllerState::LiveView {
            info!("stopping live view");
            self.set_state(ControllerState::Idle);
        }
        let sampler = self.averager.sampler();
        if let Err(e) = sampler.spectrometer().close().await {
            warn!(error = %format!("{e:#}"), "spectrometer release failed");
        }
        if let Err(e) = sampler.meter().shutdown().await {
            warn!(error = %format!("{e:#}"), "power meter release failed");
        }
        self.set_state(ControllerState::ShutDown);
        info!("instruments released");
    }
}

/// Cloneable front-end side of the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    state: watch::Receiver<ControllerState>,
    frames: watch::Receiver<Option<LiveFrame>>,
    current: watch::Receiver<Option<f64>>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        (cmd, rx): (ControllerCommand, oneshot::Receiver<AppResult<T>>),
    ) -> AppResult<T> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| PlqyError::ShutDown)?;
        rx.await.map_err(|_| PlqyError::ShutDown)?
    }

    /// Latest controller state.
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// Subscribe to live-view frames.
    pub fn watch_frames(&self) -> watch::Receiver<Option<LiveFrame>> {
        self.frames.clone()
    }

    /// Subscribe to the photodiode current (µA).
    pub fn watch_current(&self) -> watch::Receiver<Option<f64>> {
        self.current.clone()
    }

    /// Change the integration time (microseconds).
    pub async fn set_integration_time(&self, micros: u64) -> AppResult<()> {
        self.request(ControllerCommand::set_integration_time(micros)).await
    }

    /// Idle -> LiveView.
    pub async fn start_live_view(&self) -> AppResult<()> {
        self.request(ControllerCommand::start_live_view()).await
    }

    /// LiveView -> Idle.
    pub async fn stop_live_view(&self) -> AppResult<()> {
        self.request(ControllerCommand::stop_live_view()).await
    }

    /// Load the calibration curve.
    pub async fn load_calibration(&self, source: CalibrationSource) -> AppResult<()> {
        self.request(ControllerCommand::load_calibration(source)).await
    }

    /// Capture the dark spectrum.
    pub async fn collect_dark(&self) -> AppResult<()> {
        self.request(ControllerCommand::collect_dark()).await
    }

    /// Collect and persist a blank or sample set.
    pub async fn collect_set(&self, slot: Slot) -> AppResult<CollectedSet> {
        self.request(ControllerCommand::collect_set(slot)).await
    }

    /// Load a persisted set into `slot`.
    pub async fn load_set(&self, slot: Slot, path: PathBuf) -> AppResult<()> {
        self.request(ControllerCommand::load_set(slot, path)).await
    }

    /// Analyze the current blank and sample.
    pub async fn analyze(&self, bounds: RegionBounds) -> AppResult<AnalysisOutcome> {
        self.request(ControllerCommand::analyze(bounds)).await
    }

    /// Analyze and save the report; returns its path.
    pub async fn save_analysis(&self, bounds: RegionBounds) -> AppResult<PathBuf> {
        self.request(ControllerCommand::save_analysis(bounds)).await
    }

    /// Release the instruments. Completes even if the task is already gone.
    pub async fn shutdown(&self) {
        let (cmd, rx) = ControllerCommand::shutdown();
        if self.commands.send(cmd).await.is_ok() {
            let _ = rx.await;
        }
    }
}
