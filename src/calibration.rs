use crate::util::round_tenths;
use chrono::{DateTime, Local, SecondsFormat, Utc};

/// Per-sensor additive corrections, fixed for the life of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationOffsets {
    pub temperature: f64,
    pub humidity: f64,
}

/// One calibrated reading. Only `Calibrator` builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    taken_at: DateTime<Local>,
    temperature: f64,
    humidity: f64,
}

impl Sample {
    pub fn taken_at(&self) -> DateTime<Local> {
        self.taken_at
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn taken_at_utc(&self) -> DateTime<Utc> {
        self.taken_at.with_timezone(&Utc)
    }

    /// e.g. `2024-03-01T09:30:00Z`
    pub fn utc_iso(&self) -> String {
        self.taken_at_utc().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Calibrator {
    offsets: CalibrationOffsets,
}

impl Calibrator {
    pub fn new(offsets: CalibrationOffsets) -> Self {
        Calibrator { offsets }
    }

    pub fn calibrate(&self, raw_temperature: f64, raw_humidity: f64) -> Sample {
        self.calibrate_at(raw_temperature, raw_humidity, Local::now())
    }

    /// Adds the offsets and rounds each field to tenths, ties away from zero.
    pub fn calibrate_at(
        &self,
        raw_temperature: f64,
        raw_humidity: f64,
        taken_at: DateTime<Local>,
    ) -> Sample {
        Sample {
            taken_at,
            temperature: round_tenths(raw_temperature + self.offsets.temperature),
            humidity: round_tenths(raw_humidity + self.offsets.humidity),
        }
    }
}
