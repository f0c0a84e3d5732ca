//! Persistence: measurement sets, calibration files, analysis reports and
//! the in-memory blank/sample repository.
pub mod calibration;
pub mod report;
pub mod repository;
pub mod storage;
