use crate::calibration::{Calibrator, Sample};
use log::{error, warn};
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Pause between attempts. The DHT22 needs ~2 s between polls anyway.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// One poll of the sensor. Either field may come back missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Anything that can be polled for a temperature/humidity pair.
/// Every `Err` is treated as transient.
pub trait ReadingSource {
    type Error: Display;

    async fn read(&mut self) -> Result<RawReading, Self::Error>;
}

/// A raw reading with both fields present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidReading {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("invalid or missing sensor data")]
    Exhausted { attempts: u32 },
}

/// What a single cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionOutcome {
    Success(Sample),
    Failure(String),
}

impl AcquisitionOutcome {
    pub fn from_acquisition(
        result: Result<ValidReading, AcquireError>,
        calibrator: &Calibrator,
    ) -> Self {
        match result {
            Ok(reading) => AcquisitionOutcome::Success(
                calibrator.calibrate(reading.temperature, reading.humidity),
            ),
            Err(e) => AcquisitionOutcome::Failure(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AcquisitionOutcome::Success(_))
    }
}

/// Polls a source up to `max_attempts` times with a fixed pause in between.
pub struct RetryAcquirer<S> {
    source: S,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<S: ReadingSource> RetryAcquirer<S> {
    pub fn new(source: S, max_attempts: u32) -> Self {
        RetryAcquirer {
            source,
            max_attempts: max_attempts.max(1),
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn acquire(&mut self) -> Result<ValidReading, AcquireError> {
        let max = self.max_attempts;

        for attempt in 1..=max {
            match self.source.read().await {
                Ok(RawReading {
                    temperature: Some(temperature),
                    humidity: Some(humidity),
                }) => {
                    return Ok(ValidReading {
                        temperature,
                        humidity,
                    })
                }
                Ok(_) => warn!("Attempt {}/{}: Invalid sensor reading, retrying...", attempt, max),
                Err(e) => warn!("Attempt {}/{}: Sensor error: {}, retrying...", attempt, max, e),
            }

            // No pause after the final attempt; the cycle is over either way.
            if attempt < max {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        error!("Failed to get valid temperature or humidity data.");
        Err(AcquireError::Exhausted { attempts: max })
    }
}
