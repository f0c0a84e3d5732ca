//! MeasurementSet persistence.
//!
//! One CSV artifact per blank or sample collection, two sections separated
//! by a single blank line:
//!
//! ```text
//! meas0_power,meas1_power,laser_power_mean_uA
//! 12.5,12.4,12.45
//!
//! wavelength,meas_0,meas_1,mean_photon_counts
//! 350,0.01,0.02,0.015
//! ...
//! ```
//!
//! Floats are written in shortest round-trip form, so a reload reproduces
//! every value exactly.

use crate::error::{AppResult, PlqyError};
use crate::measurement::{Measurement, MeasurementSet, MEAN_COLUMN, MEAN_POWER_COLUMN};
use crate::spectrum::WavelengthAxis;
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const WAVELENGTH_COLUMN: &str = "wavelength";

/// Power column label of the `index`-th measurement.
pub fn power_label(index: usize) -> String {
    format!("meas{index}_power")
}

/// Writes and reads MeasurementSet artifacts under one directory.
#[derive(Debug, Clone)]
pub struct MeasurementStore {
    output_dir: PathBuf,
}

impl MeasurementStore {
    /// Store writing under `output_dir`, created on first persist.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory artifacts are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<output_dir>/<YYYYmmdd-HHMMSS>_<name>.csv`
    pub fn path_for(&self, name: &str, at: DateTime<Local>) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.csv", at.format("%Y%m%d-%H%M%S"), name))
    }

    /// Write `set` to a new timestamped artifact and return its path.
    pub fn persist(&self, set: &MeasurementSet, name: &str) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.path_for(name, Local::now());
        write_set(&path, set)?;
        info!(path = %path.display(), measurements = set.measurements().len(), "measurement set saved");
        Ok(path)
    }
}

/// Write `set` to `path`, replacing any existing file.
pub fn write_set(path: &Path, set: &MeasurementSet) -> AppResult<()> {
    let mut file = BufWriter::new(File::create(path)?);

    {
        let mut writer = csv::Writer::from_writer(&mut file);
        let mut header: Vec<String> = (0..set.measurements().len()).map(power_label).collect();
        header.push(MEAN_POWER_COLUMN.to_string());
        writer.write_record(&header)?;

        let mut row: Vec<String> = set
            .measurements()
            .iter()
            .map(|m| m.power_ua.to_string())
            .collect();
        row.push(set.mean_power_ua().to_string());
        writer.write_record(&row)?;
        writer.flush()?;
    }
    file.write_all(b"\n")?;

    {
        let mut writer = csv::Writer::from_writer(&mut file);
        let mut header = vec![WAVELENGTH_COLUMN.to_string()];
        header.extend(set.measurements().iter().map(|m| m.label.clone()));
        header.push(MEAN_COLUMN.to_string());
        writer.write_record(&header)?;

        let mut row = Vec::with_capacity(header.len());
        for (i, wavelength) in set.axis().wavelengths().iter().enumerate() {
            row.clear();
            row.push(wavelength.to_string());
            row.extend(set.measurements().iter().map(|m| m.photon_counts[i].to_string()));
            row.push(set.mean_photon_counts()[i].to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }
    file.flush()?;
    Ok(())
}

fn parse_field(path: &Path, field: &str, what: &str) -> AppResult<f64> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|e| PlqyError::invalid_artifact(path, format!("{what}: cannot parse '{field}': {e}")))
}

fn split_sections(text: &str) -> Option<(&str, &str)> {
    let normalized_break = text.find("\n\n").map(|i| (i, 2));
    let crlf_break = text.find("\r\n\r\n").map(|i| (i, 4));
    let (at, len) = match (normalized_break, crlf_break) {
        (Some(a), Some(b)) => {
            if a.0 < b.0 {
                a
            } else {
                b
            }
        }
        (a, b) => a.or(b)?,
    };
    Some((&text[..at], &text[at + len..]))
}

/// Read a MeasurementSet artifact written by [`write_set`].
pub fn load_set(path: &Path) -> AppResult<MeasurementSet> {
    let text = fs::read_to_string(path)?;
    let (power_section, spectrum_section) = split_sections(&text)
        .ok_or_else(|| PlqyError::invalid_artifact(path, "missing blank line between sections"))?;

    // Power table: one header, one row.
    let mut power_reader = csv::Reader::from_reader(power_section.as_bytes());
    let power_header = power_reader.headers()?.clone();
    if power_header.iter().last() != Some(MEAN_POWER_COLUMN) {
        return Err(PlqyError::invalid_artifact(
            path,
            format!("power table must end with {MEAN_POWER_COLUMN}"),
        ));
    }
    let power_row = power_reader
        .records()
        .next()
        .ok_or_else(|| PlqyError::invalid_artifact(path, "power table has no values"))??;
    let powers = power_row
        .iter()
        .map(|f| parse_field(path, f, "power"))
        .collect::<AppResult<Vec<f64>>>()?;
    let n = power_header.len() - 1;
    if powers.len() != n + 1 {
        return Err(PlqyError::invalid_artifact(path, "power row length does not match its header"));
    }

    // Spectrum table: wavelength, one column per measurement, mean.
    let mut spectrum_reader = csv::Reader::from_reader(spectrum_section.as_bytes());
    let spectrum_header = spectrum_reader.headers()?.clone();
    if spectrum_header.len() != n + 2
        || spectrum_header.get(0) != Some(WAVELENGTH_COLUMN)
        || spectrum_header.get(n + 1) != Some(MEAN_COLUMN)
    {
        return Err(PlqyError::invalid_artifact(
            path,
            format!("spectrum header must be {WAVELENGTH_COLUMN}, {n} measurement columns, {MEAN_COLUMN}"),
        ));
    }

    let mut wavelengths = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); n + 1];
    for record in spectrum_reader.records() {
        let record = record?;
        if record.len() != n + 2 {
            return Err(PlqyError::invalid_artifact(
                path,
                format!("row {} has {} fields, expected {}", wavelengths.len() + 1, record.len(), n + 2),
            ));
        }
        wavelengths.push(parse_field(path, &record[0], WAVELENGTH_COLUMN)?);
        for (column, field) in columns.iter_mut().zip(record.iter().skip(1)) {
            column.push(parse_field(path, field, "photon counts")?);
        }
    }

    let axis = Arc::new(
        WavelengthAxis::new(wavelengths)
            .map_err(|e| PlqyError::invalid_artifact(path, e.to_string()))?,
    );
    let mean_photon_counts = columns.pop().unwrap_or_default();
    let measurements = columns
        .into_iter()
        .zip(spectrum_header.iter().skip(1))
        .zip(&powers)
        .map(|((photon_counts, label), power_ua)| Measurement {
            label: label.to_string(),
            photon_counts,
            power_ua: *power_ua,
        })
        .collect();

    MeasurementSet::from_parts(axis, measurements, mean_photon_counts, powers[n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::measurement_label;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_set() -> MeasurementSet {
        let axis = Arc::new(WavelengthAxis::new(vec![400.123456789, 400.5, 401.0, 401.75]).unwrap());
        let measurements = vec![
            Measurement {
                label: measurement_label(0),
                photon_counts: vec![0.1, 1.0 / 3.0, -2.5e-7, 1234.5678],
                power_ua: 12.345678901234,
            },
            Measurement {
                label: measurement_label(1),
                photon_counts: vec![0.2, 2.0 / 3.0, 3.5e-7, 1000.0],
                power_ua: 12.1,
            },
        ];
        MeasurementSet::from_measurements(axis, measurements).unwrap()
    }

    #[test]
    fn persist_then_load_reproduces_every_column() {
        let dir = tempdir().unwrap();
        let store = MeasurementStore::new(dir.path());
        let set = sample_set();

        let path = store.persist(&set, "blank").unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_blank.csv"));

        let loaded = load_set(&path).unwrap();
        assert_eq!(loaded, set);
    }

    #[test]
    fn layout_has_two_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.csv");
        write_set(&path, &sample_set()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "meas0_power,meas1_power,laser_power_mean_uA");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "wavelength,meas_0,meas_1,mean_photon_counts");
        assert_eq!(lines.len(), 4 + 4);
    }

    #[test]
    fn file_name_uses_timestamp() {
        let store = MeasurementStore::new("/data");
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            store.path_for("sample", at),
            PathBuf::from("/data/20240309-140507_sample.csv")
        );
    }

    #[test]
    fn rejects_malformed_artifacts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");

        fs::write(&path, "meas0_power,laser_power_mean_uA\n1,1\n").unwrap();
        assert!(matches!(load_set(&path), Err(PlqyError::InvalidArtifact { .. })));

        fs::write(
            &path,
            "meas0_power,laser_power_mean_uA\n1,1\n\nwavelength,meas_0,mean_photon_counts\n400,x,1\n401,1,1\n",
        )
        .unwrap();
        assert!(matches!(load_set(&path), Err(PlqyError::InvalidArtifact { .. })));

        fs::write(
            &path,
            "meas0_power,laser_power_mean_uA\n1,1\n\nwavelength,meas_0\n400,1\n401,1\n",
        )
        .unwrap();
        assert!(matches!(load_set(&path), Err(PlqyError::InvalidArtifact { .. })));
    }

    #[test]
    fn loads_hand_written_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hand.csv");
        fs::write(
            &path,
            "meas0_power,laser_power_mean_uA\r\n2,2\r\n\r\nwavelength,meas_0,mean_photon_counts\r\n400,1,1\r\n401,3,3\r\n",
        )
        .unwrap();
        let set = load_set(&path).unwrap();
        assert_eq!(set.mean_photon_counts(), &[1.0, 3.0]);
        assert_eq!(set.measurements()[0].power_ua, 2.0);
    }
}
