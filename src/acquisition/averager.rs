//! Subrun averaging.
//!
//! A measurement's raw spectrum is the element-wise mean of `subruns`
//! sequential samples; its power is the mean of the per-subrun mean powers.

use crate::acquisition::sampler::SynchronizedSampler;
use crate::error::{AppResult, PlqyError};
use crate::measurement::{column_mean, mean, PowerReading};
use crate::spectrum::{Spectrum, WavelengthAxis};
use std::sync::Arc;
use tracing::{debug, info};

/// Repeats [`SynchronizedSampler::sample`] and averages the results.
#[derive(Clone)]
pub struct SubrunAverager {
    sampler: SynchronizedSampler,
    axis: Arc<WavelengthAxis>,
}

impl SubrunAverager {
    /// Averager producing spectra on `axis`.
    pub fn new(sampler: SynchronizedSampler, axis: Arc<WavelengthAxis>) -> Self {
        Self { sampler, axis }
    }

    /// The wavelength axis every spectrum is checked against.
    pub fn axis(&self) -> &Arc<WavelengthAxis> {
        &self.axis
    }

    /// The underlying sampler.
    pub fn sampler(&self) -> &SynchronizedSampler {
        &self.sampler
    }

    /// Collect `subruns` samples and average them.
    ///
    /// Any failed subrun aborts the whole collection.
    pub async fn collect(&self, subruns: usize) -> AppResult<(Spectrum, PowerReading)> {
        if subruns == 0 {
            return Err(PlqyError::Configuration(
                "subruns must be at least 1".into(),
            ));
        }
        let mut samples = Vec::with_capacity(subruns);
        for n in 1..=subruns {
            info!(subrun = n, total = subruns, "collecting subrun {n} of {subruns}");
            samples.push(self.sampler.sample().await?);
        }
        average_subruns(&self.axis, &samples)
    }
}

/// Average already collected subruns onto `axis`.
pub fn average_subruns(
    axis: &Arc<WavelengthAxis>,
    samples: &[(Vec<f64>, PowerReading)],
) -> AppResult<(Spectrum, PowerReading)> {
    if samples.is_empty() {
        return Err(PlqyError::Configuration(
            "subruns must be at least 1".into(),
        ));
    }
    if let Some((counts, _)) = samples.iter().find(|(c, _)| c.len() != axis.len()) {
        return Err(PlqyError::Instrument(format!(
            "spectrometer returned {} points, wavelength axis has {}",
            counts.len(),
            axis.len()
        )));
    }

    let curves: Vec<&[f64]> = samples.iter().map(|(c, _)| c.as_slice()).collect();
    let averaged = column_mean(&curves, axis.len())?;

    let powers: Vec<f64> = samples.iter().map(|(_, p)| p.mean_ua).collect();
    let power = PowerReading {
        mean_ua: mean(&powers).unwrap_or(f64::NAN),
        readings: samples.iter().map(|(_, p)| p.readings).sum(),
    };
    debug!(subruns = samples.len(), power_ua = power.mean_ua, "subruns averaged");

    Ok((Spectrum::new(Arc::clone(axis), averaged)?, power))
}
