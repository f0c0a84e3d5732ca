//! Analysis-save artifact.
//!
//! Written next to the sample file as
//! `<sample_dir>/<stem>_analysis/<stem>_analysis_<datetime>.csv`:
//!
//! ```text
//! Bounds:
//! Excit_lower_bound, Excit_upper_bound, PL_lower_bound, PL_upper_bound
//! 400,410,500,710
//!
//! Sample: <name>
//! ,excit_total_counts,fluor_total_counts
//! meas_0,<ex>,<em>
//! mean_photon_counts,<ex>,<em>
//!
//! Blank: <name>
//! ...
//!
//! Photons_emitted_mean: ,<x>
//! Photons_absorbed_mean: ,<x>
//! PLQY: ,<x>
//! PLQY_std: ,<x>
//! ```

use crate::analysis::{estimate, integrate, PlqyResult, RegionBounds, RegionSums};
use crate::data::repository::{MeasurementRepository, Slot};
use crate::error::{AppResult, PlqyError};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything one analysis save contains.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisReport<'a> {
    /// Display name of the sample set.
    pub sample_name: &'a str,
    /// Display name of the blank set.
    pub blank_name: &'a str,
    /// Sample region sums.
    pub sample: &'a RegionSums,
    /// Blank region sums.
    pub blank: &'a RegionSums,
    /// The estimate.
    pub result: &'a PlqyResult,
}

/// Region sums and the estimate for the current blank and sample.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Display name of the blank set.
    pub blank_name: String,
    /// Display name of the sample set.
    pub sample_name: String,
    /// Artifact the sample set came from, if any.
    pub sample_path: Option<PathBuf>,
    /// Blank region sums.
    pub blank: RegionSums,
    /// Sample region sums.
    pub sample: RegionSums,
    /// The PLQY estimate.
    pub result: PlqyResult,
}

impl AnalysisOutcome {
    /// Integrate both slots of `repository` with `bounds` and estimate.
    pub fn compute(repository: &MeasurementRepository, bounds: &RegionBounds) -> AppResult<Self> {
        let blank = repository.require(Slot::Blank)?;
        let sample = repository.require(Slot::Sample)?;
        if blank.set.axis() != sample.set.axis() {
            return Err(PlqyError::CalibrationMismatch(
                "blank and sample were measured on different wavelength axes".into(),
            ));
        }

        let blank_sums = integrate(&blank.set, bounds);
        let sample_sums = integrate(&sample.set, bounds);
        let result = estimate(&blank_sums, &sample_sums);
        info!(%result, "analysis complete");

        Ok(Self {
            blank_name: blank.display_name(Slot::Blank),
            sample_name: sample.display_name(Slot::Sample),
            sample_path: sample.path.clone(),
            blank: blank_sums,
            sample: sample_sums,
            result,
        })
    }

    /// Borrowed report view.
    pub fn report(&self) -> AnalysisReport<'_> {
        AnalysisReport {
            sample_name: &self.sample_name,
            blank_name: &self.blank_name,
            sample: &self.sample,
            blank: &self.blank,
            result: &self.result,
        }
    }

    /// Save the report next to the sample artifact.
    pub fn save(&self) -> AppResult<PathBuf> {
        let sample_path = self
            .sample_path
            .as_deref()
            .ok_or(PlqyError::MissingPrerequisite("a saved sample measurement set"))?;
        self.report().save_for(sample_path)
    }
}

/// Where the report for `sample_path` saved at `at` goes.
pub fn report_path(sample_path: &Path, at: DateTime<Local>) -> PathBuf {
    let stem = sample_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());
    let dir = sample_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{stem}_analysis"));
    dir.join(format!("{stem}_analysis_{}.csv", at.format("%Y%m%d-%H%M%S")))
}

impl AnalysisReport<'_> {
    /// Save next to `sample_path`, creating the analysis directory.
    pub fn save_for(&self, sample_path: &Path) -> AppResult<PathBuf> {
        let path = report_path(sample_path, Local::now());
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        self.write_to(&path)?;
        info!(path = %path.display(), plqy = self.result.plqy, "analysis saved");
        Ok(path)
    }

    /// Write the report to `path`.
    pub fn write_to(&self, path: &Path) -> AppResult<()> {
        let mut out = BufWriter::new(File::create(path)?);

        writeln!(out, "Bounds: ")?;
        writeln!(
            out,
            "Excit_lower_bound, Excit_upper_bound, PL_lower_bound, PL_upper_bound"
        )?;
        let bounds = self.result.bounds.as_array().map(|b| b.to_string());
        writeln!(out, "{}", bounds.join(","))?;
        writeln!(out)?;

        write_sums(&mut out, "Sample", self.sample_name, self.sample)?;
        writeln!(out)?;
        write_sums(&mut out, "Blank", self.blank_name, self.blank)?;
        writeln!(out)?;

        let r = self.result;
        writeln!(out, "Photons_emitted_mean: ,{}", r.photons_emitted)?;
        writeln!(out, "Photons_absorbed_mean: ,{}", r.photons_absorbed)?;
        writeln!(out, "PLQY: ,{}", r.plqy)?;
        writeln!(out, "PLQY_std: ,{}", r.plqy_std)?;
        if !r.flags.is_empty() {
            let flags: Vec<String> = r.flags.iter().map(ToString::to_string).collect();
            writeln!(out, "Flags: ,{}", flags.join(";"))?;
        }
        out.flush()?;
        Ok(())
    }
}

fn write_sums<W: Write>(out: &mut W, title: &str, name: &str, sums: &RegionSums) -> AppResult<()> {
    writeln!(out, "{title}: {name}")?;
    let mut writer = csv::Writer::from_writer(&mut *out);
    writer.write_record(["", "excit_total_counts", "fluor_total_counts"])?;
    for column in sums.columns() {
        writer.write_record([
            column.label.clone(),
            column.excitation.to_string(),
            column.emission.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
