//! CLI Entry Point for abs_plqy
//!
//! Provides command-line interface for:
//! - Running an interactive PLQY session (dark, blank, sample, analysis)
//! - Re-analyzing persisted measurement sets
//! - Previewing the live spectrometer view
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Interactive session with the configured instruments:
//! ```bash
//! abs_plqy run --calibration calibration/sphere.txt
//! ```
//!
//! Offline analysis:
//! ```bash
//! abs_plqy analyze --blank data/20240601-091500_blank.csv \
//!     --sample data/20240601-092000_sample.csv --save
//! ```

use abs_plqy::analysis::RegionBounds;
use abs_plqy::config::{Settings, DEFAULT_CONFIG_PATH};
use abs_plqy::controller::{AcquisitionController, ControllerHandle};
use abs_plqy::data::report::AnalysisOutcome;
use abs_plqy::data::repository::{MeasurementRepository, Slot};
use abs_plqy::hardware::{self, mock::Illumination, mock::MockSpectrometer};
use abs_plqy::logging;
use abs_plqy::messages::CalibrationSource;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser)]
#[command(name = "abs_plqy")]
#[command(about = "Absolute photoluminescence quantum yield acquisition and analysis", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: dark, blank and sample collection, then analysis
    Run {
        /// Calibration file (overrides storage.calibration_file)
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Show this many live-view frames before collecting
        #[arg(long, default_value = "0")]
        preview_frames: usize,
    },

    /// Analyze persisted blank and sample sets
    Analyze {
        /// Blank measurement-set file
        #[arg(long)]
        blank: PathBuf,

        /// Sample measurement-set file
        #[arg(long)]
        sample: PathBuf,

        #[command(flatten)]
        bounds: BoundsArgs,

        /// Save the analysis report next to the sample file
        #[arg(long)]
        save: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Preview the live spectrometer view
    Live {
        /// Number of frames to print
        #[arg(long, default_value = "10")]
        frames: usize,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Integration-window overrides; unset values come from the configuration.
#[derive(Args)]
struct BoundsArgs {
    /// Excitation window lower bound (nm)
    #[arg(long)]
    excit_low: Option<f64>,
    /// Excitation window upper bound (nm)
    #[arg(long)]
    excit_high: Option<f64>,
    /// Emission window lower bound (nm)
    #[arg(long)]
    pl_low: Option<f64>,
    /// Emission window upper bound (nm)
    #[arg(long)]
    pl_high: Option<f64>,
}

impl BoundsArgs {
    fn resolve(&self, settings: &Settings) -> RegionBounds {
        let a = &settings.analysis;
        RegionBounds::new(
            self.excit_low.unwrap_or(a.excit_lower_bound),
            self.excit_high.unwrap_or(a.excit_upper_bound),
            self.pl_low.unwrap_or(a.pl_lower_bound),
            self.pl_high.unwrap_or(a.pl_upper_bound),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    settings.validate()?;
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Run {
            calibration,
            preview_frames,
        } => run_session(settings, calibration, preview_frames).await,
        Commands::Analyze {
            blank,
            sample,
            bounds,
            save,
            json,
        } => {
            let bounds = bounds.resolve(&settings);
            analyze_files(blank, sample, bounds, save, json)
        }
        Commands::Live { frames } => live_preview(settings, frames).await,
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

async fn start_controller(
    settings: Settings,
) -> Result<(ControllerHandle, tokio::task::JoinHandle<()>, Option<Arc<MockSpectrometer>>)> {
    let instruments = hardware::open_instruments(&settings).await?;
    let controller =
        AcquisitionController::connect(settings, instruments.spectrometer, instruments.meter)
            .await?;
    let (handle, task) = controller.spawn();
    Ok((handle, task, instruments.mock_spectrometer))
}

async fn prompt(message: &str) -> Result<()> {
    println!("👉 {message}, then press Enter");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading operator confirmation")?;
    Ok(())
}

async fn run_session(
    settings: Settings,
    calibration: Option<PathBuf>,
    preview_frames: usize,
) -> Result<()> {
    let bounds = settings.analysis.bounds();
    let calibration = calibration.or_else(|| settings.storage.calibration_file.clone());
    let (handle, task, mock) = start_controller(settings).await?;

    let result = session_steps(&handle, mock.as_deref(), calibration, preview_frames, bounds).await;

    handle.shutdown().await;
    let _ = task.await;
    result
}

async fn session_steps(
    handle: &ControllerHandle,
    mock: Option<&MockSpectrometer>,
    calibration: Option<PathBuf>,
    preview_frames: usize,
    bounds: RegionBounds,
) -> Result<()> {
    let source = match calibration {
        Some(path) => {
            println!("📐 Loading calibration: {}", path.display());
            CalibrationSource::File(path)
        }
        None => {
            warn!("no calibration file configured, using a uniform factor of 1.0");
            CalibrationSource::Uniform(1.0)
        }
    };
    handle.load_calibration(source).await?;

    if preview_frames > 0 {
        if let Some(mock) = mock {
            mock.set_illumination(Illumination::Blank).await;
        }
        print_frames(handle, preview_frames).await?;
    }

    prompt("Block the excitation source").await?;
    if let Some(mock) = mock {
        mock.set_illumination(Illumination::Dark).await;
    }
    handle.collect_dark().await?;
    println!("✅ Dark spectrum captured");

    prompt("Insert the blank").await?;
    if let Some(mock) = mock {
        mock.set_illumination(Illumination::Blank).await;
    }
    let blank = handle.collect_set(Slot::Blank).await?;
    println!(
        "✅ Blank saved: {} ({} measurements, {:.3} µA)",
        blank.path.display(),
        blank.measurements,
        blank.mean_power_ua
    );

    prompt("Insert the sample").await?;
    if let Some(mock) = mock {
        mock.set_illumination(Illumination::Sample).await;
    }
    let sample = handle.collect_set(Slot::Sample).await?;
    println!(
        "✅ Sample saved: {} ({} measurements, {:.3} µA)",
        sample.path.display(),
        sample.measurements,
        sample.mean_power_ua
    );

    let outcome = handle.analyze(bounds).await?;
    println!();
    println!("📊 {}", outcome.result);
    let report = handle.save_analysis(bounds).await?;
    println!("💾 Analysis saved: {}", report.display());
    Ok(())
}

fn analyze_files(
    blank: PathBuf,
    sample: PathBuf,
    bounds: RegionBounds,
    save: bool,
    json: bool,
) -> Result<()> {
    let mut repository = MeasurementRepository::new();
    repository.load_file(Slot::Blank, &blank)?;
    repository.load_file(Slot::Sample, &sample)?;

    let outcome = AnalysisOutcome::compute(&repository, &bounds)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    } else {
        println!("Blank:  {}", outcome.blank_name);
        println!("Sample: {}", outcome.sample_name);
        println!("{}", outcome.result);
    }

    if save {
        let path = outcome.save()?;
        if !json {
            println!("💾 Analysis saved: {}", path.display());
        }
    }
    Ok(())
}

async fn live_preview(settings: Settings, frames: usize) -> Result<()> {
    let (handle, task, mock) = start_controller(settings).await?;
    if let Some(mock) = &mock {
        mock.set_illumination(Illumination::Blank).await;
    }
    let result = print_frames(&handle, frames).await;
    handle.shutdown().await;
    let _ = task.await;
    result
}

async fn print_frames(handle: &ControllerHandle, frames: usize) -> Result<()> {
    let mut rx = handle.watch_frames();
    handle.start_live_view().await?;
    for _ in 0..frames {
        rx.changed().await.context("controller stopped during live view")?;
        let frame = rx.borrow_and_update().clone();
        if let Some(frame) = frame {
            let current = frame
                .current_ua
                .map(|ua| format!("{ua:.3} µA"))
                .unwrap_or_else(|| "n/a".to_string());
            let marker = if frame.saturated { "  ⚠️  SATURATED" } else { "" };
            println!(
                "frame {:>4}  peak {:>9.0}  current {current}{marker}",
                frame.sequence, frame.peak
            );
        }
    }
    handle.stop_live_view().await?;
    Ok(())
}
