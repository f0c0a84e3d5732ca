//! Agilent (Keysight) 34410A Digital Multimeter Driver
//!
//! Reference: Agilent 34410A/11A Programmer's Reference
//!
//! Protocol Overview:
//! - Transport: raw SCPI socket over LAN (port 5025)
//! - Terminator: LF (\n)
//! - Query: MEAS:CURR:DC? (one DC current reading, autorange)
//! - Setup: *RST, *CLS
//! - Release: SYST:LOC (return front panel to the user)
//!
//! # Example Usage
//!
//! ```no_run
//! use abs_plqy::hardware::agilent_34410a::Agilent34410ADriver;
//! use abs_plqy::hardware::capabilities::CurrentMeter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let meter = Agilent34410ADriver::connect("192.168.1.20:5025").await?;
//!     meter.reset().await?;
//!     meter.clear().await?;
//!
//!     let amps = meter.read_current_dc().await?;
//!     tracing::info!("photodiode current: {:.3e} A", amps);
//!
//!     meter.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::hardware::capabilities::CurrentMeter;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default raw SCPI socket port of Keysight instruments
pub const SCPI_PORT: u16 = 5025;

/// Driver for the Agilent 34410A digital multimeter
///
/// Implements the CurrentMeter capability over a LAN SCPI socket.
pub struct Agilent34410ADriver {
    /// Socket protected by Mutex for exclusive access
    stream: Mutex<BufReader<TcpStream>>,
    /// Command timeout duration
    timeout: Duration,
}

impl Agilent34410ADriver {
    /// Open a SCPI session
    ///
    /// # Arguments
    /// * `address` - `host:port`, or just `host` to use port 5025
    ///
    /// # Errors
    /// Returns error if the socket cannot be opened
    pub async fn connect(address: &str) -> Result<Self> {
        Self::connect_with_timeout(address, Duration::from_millis(2000)).await
    }

    /// Open a SCPI session with a custom per-command timeout
    pub async fn connect_with_timeout(address: &str, timeout: Duration) -> Result<Self> {
        let target = if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{SCPI_PORT}")
        };
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&target))
            .await
            .with_context(|| format!("Agilent 34410A connect timeout ({target})"))?
            .with_context(|| format!("Failed to connect to Agilent 34410A at {target}"))?;
        stream.set_nodelay(true).ok();
        info!(%target, "Agilent 34410A session opened");

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            timeout,
        })
    }

    /// Query the identification string (*IDN?)
    pub async fn identify(&self) -> Result<String> {
        self.query("*IDN?").await
    }

    /// Send query and read response
    async fn query(&self, command: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;

        let cmd = format!("{}\n", command);
        stream
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("Agilent 34410A write failed ({command})"))?;

        let mut response = String::new();
        let read = tokio::time::timeout(self.timeout, stream.read_line(&mut response))
            .await
            .with_context(|| format!("Agilent 34410A read timeout ({command})"))??;
        if read == 0 {
            return Err(anyhow!("Agilent 34410A closed the connection"));
        }

        Ok(response.trim().to_string())
    }

    /// Send a command that produces no response
    async fn send(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;
        let cmd = format!("{}\n", command);
        stream
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("Agilent 34410A write failed ({command})"))?;
        debug!(command, "Agilent 34410A command sent");
        Ok(())
    }
}

/// Parse a `MEAS:CURR:DC?` response
///
/// Handles SCPI numeric format like "+1.23456789E-05". The meter reports an
/// overload as +9.9E+37, which is rejected.
pub fn parse_current_response(response: &str) -> Result<f64> {
    let trimmed = response.trim();

    if trimmed.is_empty() {
        return Err(anyhow!("Empty current response"));
    }

    let value = trimmed
        .parse::<f64>()
        .with_context(|| format!("Failed to parse current response: '{}'", trimmed))?;

    if !value.is_finite() || value.abs() >= 9.9e37 {
        return Err(anyhow!("Meter overload: {}", trimmed));
    }
    Ok(value)
}

#[async_trait]
impl CurrentMeter for Agilent34410ADriver {
    async fn read_current_dc(&self) -> Result<f64> {
        let response = self.query("MEAS:CURR:DC?").await?;
        parse_current_response(&response)
    }

    async fn reset(&self) -> Result<()> {
        self.send("*RST").await
    }

    async fn clear(&self) -> Result<()> {
        self.send("*CLS").await
    }

    async fn shutdown(&self) -> Result<()> {
        self.send("SYST:LOC").await?;
        let mut stream = self.stream.lock().await;
        stream
            .get_mut()
            .shutdown()
            .await
            .context("Agilent 34410A socket close failed")?;
        info!("Agilent 34410A session released");
        Ok(())
    }
}
