//! Custom error types for the application.
//!
//! This module defines the primary error type, `PlqyError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that abort an acquisition or an analysis step.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in the configuration sources.
//! - **`Configuration`**: Semantic errors in the configuration or in caller-supplied
//!   parameters (e.g. a subrun count of zero). These are caught during validation.
//! - **`Io`** / **`Csv`**: File system and CSV encoding failures while persisting or
//!   reloading artifacts.
//! - **`Instrument`**: Connection or read failures from the spectrometer or the power meter.
//!   Fatal to the operation in progress; the instruments stay usable afterwards.
//! - **`NoPowerReadings`**: The power meter produced no reading during an exposure.
//! - **`CalibrationMismatch`**: Raw, dark and calibration curves do not share one axis.
//! - **`MissingPrerequisite`**: A calibrated collection was requested before the dark
//!   spectrum or the calibration curve was available.
//! - **`InvalidArtifact`**: A persisted measurement or calibration file could not be parsed.
//! - **`Busy`** / **`ShutDown`**: The acquisition controller rejected a command.
//!
//! Region bounds problems and undefined divisions are not errors: they degrade to
//! sentinel values carrying an [`crate::analysis::AnalysisFlag`].

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PlqyError>;

/// Errors surfaced by acquisition, persistence and configuration.
#[derive(Error, Debug)]
pub enum PlqyError {
    /// Configuration source could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration or parameters are well-formed but semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying file system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Instrument connection, command or read failure.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// The power poller was stopped before it collected a single reading.
    #[error("No power readings were collected during the exposure")]
    NoPowerReadings,

    /// Raw, dark and calibration curves disagree on the wavelength axis.
    #[error("Calibration mismatch: {0}")]
    CalibrationMismatch(String),

    /// A session prerequisite has not been acquired yet.
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(&'static str),

    /// A persisted file does not follow the expected layout.
    #[error("Invalid artifact {path:?}: {reason}")]
    InvalidArtifact {
        /// File that failed to parse.
        path: PathBuf,
        /// Human readable parse failure.
        reason: String,
    },

    /// The controller cannot accept the command in its current state.
    #[error("Controller busy: {0}")]
    Busy(String),

    /// The controller has already been shut down.
    #[error("Controller has shut down")]
    ShutDown,
}

impl PlqyError {
    /// Wrap a hardware-layer error, keeping the full context chain.
    pub fn instrument(err: anyhow::Error) -> Self {
        PlqyError::Instrument(format!("{err:#}"))
    }

    /// Build an [`PlqyError::InvalidArtifact`] for `path`.
    pub fn invalid_artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PlqyError::InvalidArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for PlqyError {
    fn from(err: figment::Error) -> Self {
        PlqyError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_display() {
        let err = PlqyError::Instrument("multimeter timeout".to_string());
        assert_eq!(err.to_string(), "Instrument error: multimeter timeout");
    }

    #[test]
    fn instrument_error_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("socket closed"));
        let err = inner.context("MEAS:CURR:DC? failed").unwrap_err();
        let wrapped = PlqyError::instrument(err);
        let text = wrapped.to_string();
        assert!(text.contains("MEAS:CURR:DC? failed"));
        assert!(text.contains("socket closed"));
    }

    #[test]
    fn invalid_artifact_names_the_file() {
        let err = PlqyError::invalid_artifact("/tmp/blank.csv", "missing blank line");
        assert!(err.to_string().contains("blank.csv"));
        assert!(err.to_string().contains("missing blank line"));
    }
}
