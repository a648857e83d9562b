//! Consumers of a finished cycle: the daily CSV log, InfluxDB and the status file.
//!
//! Every sink reports its own failure and nothing more. The scheduler logs the
//! error and moves on to the next sink.

pub mod append_log;
pub mod display;
pub mod influx;

use crate::acquire::AcquisitionOutcome;
use crate::calibration::Sample;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Http(String),
    #[error("server rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("not connected to InfluxDB")]
    Disconnected,
}

/// Receives calibrated samples from successful cycles only.
pub trait SampleSink {
    fn name(&self) -> &'static str;

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError>;

    /// Releases any held connection. Called once at shutdown.
    fn close(&mut self) {}
}

/// Receives every cycle's outcome, good or bad.
pub trait StatusSink {
    fn name(&self) -> &'static str;

    fn update(&mut self, outcome: &AcquisitionOutcome) -> Result<(), SinkError>;
}
