//! Message types for the acquisition controller.
//!
//! This module defines the commands and the observable state used for
//! message-passing between a front-end and the
//! [`AcquisitionController`](crate::controller::AcquisitionController).
//!
//! # Message Flow
//!
//! ```text
//! Front-end                          Controller Task
//! ---------                          ---------------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command
//!                                    4. Process (instruments, state)
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//! ```
//!
//! State changes and live-view frames travel the other way on `watch`
//! channels, so observers always see the latest value without queueing.
//!
//! # Helper Methods
//!
//! Each command variant has a helper that creates the command and returns
//! the oneshot receiver:
//!
//! ```rust
//! use abs_plqy::messages::ControllerCommand;
//!
//! let (cmd, rx) = ControllerCommand::collect_dark();
//! // cmd_tx.send(cmd).await?;
//! // let result = rx.await?;
//! ```

use crate::analysis::RegionBounds;
use crate::data::report::AnalysisOutcome;
use crate::data::repository::Slot;
use crate::error::AppResult;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// What a collection is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Baseline with the excitation source blocked.
    Dark,
    /// A blank or sample measurement set.
    Set(Slot),
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::Dark => f.write_str("dark"),
            CollectionKind::Set(slot) => write!(f, "{slot}"),
        }
    }
}

/// Controller state machine.
///
/// ```text
/// Idle <-> LiveView
/// Idle | LiveView -> Collecting -> (previous state)
/// any -> ShutDown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Instruments open, nothing running.
    Idle,
    /// Periodic preview exposures.
    LiveView,
    /// A dark, blank or sample collection is running.
    Collecting(CollectionKind),
    /// Instruments released; terminal.
    ShutDown,
}

/// One live-view exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrame {
    /// Frame counter since the controller started.
    pub sequence: u64,
    /// Raw intensities.
    pub counts: Vec<f64>,
    /// Highest count in the frame.
    pub peak: f64,
    /// `peak` reached the detector's saturation level.
    pub saturated: bool,
    /// Photodiode current read with the frame, µA.
    pub current_ua: Option<f64>,
}

/// Summary of a finished blank or sample collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedSet {
    /// Repository slot the set was stored in.
    pub slot: Slot,
    /// Artifact the set was persisted to.
    pub path: PathBuf,
    /// Number of measurements in the set.
    pub measurements: usize,
    /// Mean excitation power, µA.
    pub mean_power_ua: f64,
}

/// Where the calibration curve comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationSource {
    /// Tab-separated calibration artifact.
    File(PathBuf),
    /// Every factor equal to the given value.
    Uniform(f64),
}

/// Commands accepted by the controller task.
///
/// Each variant carries the `oneshot::Sender` for its response.
#[derive(Debug)]
pub enum ControllerCommand {
    /// Change the spectrometer integration time (microseconds).
    SetIntegrationTime {
        /// New integration time.
        micros: u64,
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// Idle -> LiveView.
    StartLiveView {
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// LiveView -> Idle.
    StopLiveView {
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// Load or set the calibration curve.
    LoadCalibration {
        /// Source of the curve.
        source: CalibrationSource,
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// Capture the dark spectrum.
    CollectDark {
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// Collect, persist and store a measurement set.
    CollectSet {
        /// Blank or sample.
        slot: Slot,
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<CollectedSet>>,
    },
    /// Load a persisted set into a slot.
    LoadSet {
        /// Target slot.
        slot: Slot,
        /// Artifact to load.
        path: PathBuf,
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// Integrate and estimate with the given bounds.
    Analyze {
        /// Integration windows.
        bounds: RegionBounds,
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<AnalysisOutcome>>,
    },
    /// Analyze and save the report next to the sample artifact.
    SaveAnalysis {
        /// Integration windows.
        bounds: RegionBounds,
        /// Response channel.
        respond_to: oneshot::Sender<AppResult<PathBuf>>,
    },
    /// Release both instruments and stop the task.
    Shutdown {
        /// Response channel.
        respond_to: oneshot::Sender<()>,
    },
}

impl ControllerCommand {
    /// Create a SetIntegrationTime command with response receiver
    pub fn set_integration_time(micros: u64) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetIntegrationTime {
                micros,
                respond_to: tx,
            },
            rx,
        )
    }

    /// Create a StartLiveView command with response receiver
    pub fn start_live_view() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::StartLiveView { respond_to: tx }, rx)
    }

    /// Create a StopLiveView command with response receiver
    pub fn stop_live_view() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::StopLiveView { respond_to: tx }, rx)
    }

    /// Create a LoadCalibration command with response receiver
    pub fn load_calibration(source: CalibrationSource) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::LoadCalibration {
                source,
                respond_to: tx,
            },
            rx,
        )
    }

    /// Create a CollectDark command with response receiver
    pub fn collect_dark() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::CollectDark { respond_to: tx }, rx)
    }

    /// Create a CollectSet command with response receiver
    pub fn collect_set(slot: Slot) -> (Self, oneshot::Receiver<AppResult<CollectedSet>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::CollectSet {
                slot,
                respond_to: tx,
            },
            rx,
        )
    }

    /// Create a LoadSet command with response receiver
    pub fn load_set(slot: Slot, path: PathBuf) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::LoadSet {
                slot,
                path,
                respond_to: tx,
            },
            rx,
        )
    }

    /// Create an Analyze command with response receiver
    pub fn analyze(bounds: RegionBounds) -> (Self, oneshot::Receiver<AppResult<AnalysisOutcome>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Analyze {
                bounds,
                respond_to: tx,
            },
            rx,
        )
    }

    /// Create a SaveAnalysis command with response receiver
    pub fn save_analysis(bounds: RegionBounds) -> (Self, oneshot::Receiver<AppResult<PathBuf>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SaveAnalysis {
                bounds,
                respond_to: tx,
            },
            rx,
        )
    }

    /// Create a Shutdown command with response receiver
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { respond_to: tx }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_pair_command_and_receiver() {
        let (cmd, _rx) = ControllerCommand::collect_set(Slot::Sample);
        assert!(matches!(cmd, ControllerCommand::CollectSet { slot: Slot::Sample, .. }));

        let (cmd, _rx) = ControllerCommand::set_integration_time(250_000);
        assert!(matches!(cmd, ControllerCommand::SetIntegrationTime { micros: 250_000, .. }));
    }

    #[tokio::test]
    async fn response_reaches_receiver() {
        let (cmd, rx) = ControllerCommand::collect_dark();
        if let ControllerCommand::CollectDark { respond_to } = cmd {
            respond_to.send(Ok(())).unwrap();
        }
        assert!(rx.await.unwrap().is_ok());
    }

    #[test]
    fn collection_kind_names() {
        assert_eq!(CollectionKind::Dark.to_string(), "dark");
        assert_eq!(CollectionKind::Set(Slot::Blank).to_string(), "blank");
    }
}
