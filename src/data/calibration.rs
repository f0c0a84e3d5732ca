//! Irradiance calibration artifact loader.
//!
//! Tab-separated text as exported by the lamp calibration software: eight
//! preamble lines, one column-label row, then `wavelength<TAB>factor` rows.

use crate::error::{AppResult, PlqyError};
use crate::spectrum::CalibrationCurve;
use std::fs;
use std::path::Path;
use tracing::info;

/// Lines before the column-label row.
pub const PREAMBLE_LINES: usize = 8;

/// Load a calibration curve from `path`.
pub fn load_calibration(path: &Path) -> AppResult<CalibrationCurve> {
    let text = fs::read_to_string(path)?;
    let curve = parse_calibration(&text).map_err(|reason| PlqyError::invalid_artifact(path, reason))?;
    info!(path = %path.display(), points = curve.len(), "calibration loaded");
    Ok(curve)
}

/// Parse calibration text; the error is a human-readable reason.
pub fn parse_calibration(text: &str) -> Result<CalibrationCurve, String> {
    let mut lines = text.lines().skip(PREAMBLE_LINES);
    if lines.next().is_none() {
        return Err(format!(
            "expected {PREAMBLE_LINES} preamble lines and a column-label row"
        ));
    }
    let body: Vec<&str> = lines.collect();
    let body = body.join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut wavelengths = Vec::new();
    let mut factors = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| e.to_string())?;
        let row = PREAMBLE_LINES + 2 + i;
        let field = |col: usize, what: &str| -> Result<f64, String> {
            let raw = record
                .get(col)
                .ok_or_else(|| format!("line {row}: missing {what} column"))?;
            raw.parse::<f64>()
                .map_err(|e| format!("line {row}: cannot parse {what} '{raw}': {e}"))
        };
        wavelengths.push(field(0, "wavelength")?);
        factors.push(field(1, "calibration factor")?);
    }
    if factors.is_empty() {
        return Err("no calibration rows".into());
    }
    CalibrationCurve::with_wavelengths(wavelengths, factors).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PREAMBLE: &str = "Irradiance calibration\nLamp: HL-3P-CAL\nDate: 2023-05-02\n\
                            Integrating sphere: 6in\nFiber: 400um\nUnits: uJ/count\n\
                            Spectrometer: QEP01234\n----\n";

    #[test]
    fn skips_preamble_and_label_row() {
        let text = format!("{PREAMBLE}Wavelength\tFactor\n400.0\t1.5\n400.5\t1.25\n401.0\t2.0e-1\n");
        let curve = parse_calibration(&text).unwrap();
        assert_eq!(curve.factors(), &[1.5, 1.25, 0.2]);
        assert_eq!(curve.wavelengths().unwrap(), &[400.0, 400.5, 401.0]);
    }

    #[test]
    fn extra_columns_are_ignored() {
        let text = format!("{PREAMBLE}nm\tk\tnote\n400\t1\tx\n401\t2\n");
        assert_eq!(parse_calibration(&text).unwrap().factors(), &[1.0, 2.0]);
    }

    #[test]
    fn bad_rows_are_reported_with_line_numbers() {
        let text = format!("{PREAMBLE}nm\tk\n400\t1\n401\toops\n");
        let err = parse_calibration(&text).unwrap_err();
        assert!(err.contains("line 11"), "{err}");

        let text = format!("{PREAMBLE}nm\tk\n400\n");
        assert!(parse_calibration(&text).is_err());
    }

    #[test]
    fn truncated_file_is_rejected() {
        assert!(parse_calibration("only\nthree\nlines\n").is_err());
        assert!(parse_calibration(&format!("{PREAMBLE}nm\tk\n")).is_err());
    }

    #[test]
    fn load_reports_path_on_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cal.txt");
        std::fs::write(&path, "short\n").unwrap();
        match load_calibration(&path) {
            Err(PlqyError::InvalidArtifact { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }
}
