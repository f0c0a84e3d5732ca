//! # Absolute PLQY Core Library
//!
//! Acquisition and analysis of absolute photoluminescence quantum yield
//! (PLQY) measurements taken with an integrating sphere, a spectrometer and a
//! photodiode read by a multimeter. The binary (`main.rs`) is a thin CLI over
//! this library.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: `Spectrometer` and `CurrentMeter` capability traits,
//!   simulated instruments, and the Agilent 34410A LAN driver.
//! - **`acquisition`**: synchronized exposure/power sampling, subrun averaging
//!   and measurement-set aggregation.
//! - **`spectrum`** / **`measurement`**: wavelength axes, spectra, calibration
//!   curves and measurement sets.
//! - **`analysis`**: photon-count conversion, region integration and the PLQY
//!   estimate.
//! - **`data`**: measurement-set files, calibration files, analysis reports and
//!   the blank/sample repository.
//! - **`controller`** / **`messages`**: the actor owning the instruments and
//!   its command protocol.
//! - **`config`**, **`logging`**, **`error`**: ambient configuration, tracing
//!   setup and the crate error type.

pub mod acquisition;
pub mod analysis;
pub mod config;
pub mod controller;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod messages;
pub mod spectrum;
