//! Beacon scanners

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Scanner failures; the detector treats a failed scan as "beacon not seen"
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scanner I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scan timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scanner exited with {0}")]
    Failed(std::process::ExitStatus),

    #[error("Unparseable scanner output: {0:?}")]
    Parse(String),
}

/// One radio scan for a beacon
#[async_trait]
pub trait BeaconScanner: Send + 'static {
    /// RSSI of `beacon` in dBm, or `None` if it was not seen
    async fn scan(&mut self, beacon: &str) -> Result<Option<i16>, ScanError>;
}

/// Never sees anything. Used when the terminal runs in override mode only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScanner;

#[async_trait]
impl BeaconScanner for NullScanner {
    async fn scan(&mut self, _beacon: &str) -> Result<Option<i16>, ScanError> {
        Ok(None)
    }
}

/// Replays queued readings, then keeps repeating the last one.
///
/// Clones share the queue, so a test can feed readings while the detector
/// owns the scanner.
#[derive(Debug, Clone, Default)]
pub struct ScriptedScanner {
    readings: Arc<Mutex<VecDeque<Option<i16>>>>,
    last: Arc<Mutex<Option<i16>>>,
}

impl ScriptedScanner {
    pub fn new(readings: impl IntoIterator<Item = Option<i16>>) -> Self {
        let scanner = Self::default();
        scanner.extend(readings);
        scanner
    }

    /// Queue more readings
    pub fn extend(&self, readings: impl IntoIterator<Item = Option<i16>>) {
        if let Ok(mut queue) = self.readings.lock() {
            queue.extend(readings);
        }
    }

    /// Drop queued readings and report `reading` from now on
    pub fn set(&self, reading: Option<i16>) {
        if let Ok(mut queue) = self.readings.lock() {
            queue.clear();
        }
        if let Ok(mut last) = self.last.lock() {
            *last = reading;
        }
    }
}

#[async_trait]
impl BeaconScanner for ScriptedScanner {
    async fn scan(&mut self, _beacon: &str) -> Result<Option<i16>, ScanError> {
        let next = self.readings.lock().ok().and_then(|mut q| q.pop_front());
        let mut last = self.last.lock().map_err(|_| ScanError::Parse("poisoned".into()))?;
        if let Some(reading) = next {
            *last = reading;
        }
        Ok(*last)
    }
}

/// Runs an external program per scan.
///
/// The program gets the beacon address as its last argument and prints the
/// RSSI in dBm on stdout, or nothing (or `none`) when the beacon was not seen.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandScanner {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

/// Parse a scanner's stdout
pub fn parse_reading(output: &str) -> Result<Option<i16>, ScanError> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    trimmed
        .parse::<i16>()
        .map(Some)
        .map_err(|_| ScanError::Parse(trimmed.to_string()))
}

#[async_trait]
impl BeaconScanner for CommandScanner {
    async fn scan(&mut self, beacon: &str) -> Result<Option<i16>, ScanError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(beacon)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| ScanError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ScanError::Failed(output.status));
        }
        parse_reading(&String::from_utf8_lossy(&output.stdout))
    }
}
