use super::{SinkError, StatusSink};
use crate::acquire::AcquisitionOutcome;
use crate::config::DisplaySettings;
use chrono::{DateTime, Local};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub const SENSOR_ERROR: &str = "SENSOR ERROR - CHECK CONNECTION";

/// Two-line status file read by an external display. Rewritten every cycle.
pub struct StatusFile {
    label: String,
    path: PathBuf,
}

impl StatusFile {
    pub fn new(settings: &DisplaySettings) -> Self {
        StatusFile {
            label: settings.label.clone(),
            path: settings.path.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn update_at(
        &mut self,
        outcome: &AcquisitionOutcome,
        now: DateTime<Local>,
    ) -> Result<(), SinkError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let line1 = format!("{} {}", self.label, now.format("%Y-%m-%d %H:%M:%S"));
        let line2 = match outcome {
            AcquisitionOutcome::Success(sample) => {
                info!(
                    "Display updated with data: Temp={:.1}C, Hum={:.1}%",
                    sample.temperature(),
                    sample.humidity()
                );
                format!(
                    "Temp: {:.1}C Hum: {:.1}%",
                    sample.temperature(),
                    sample.humidity()
                )
            }
            AcquisitionOutcome::Failure(reason) => {
                warn!("Display updated with error: {} ({})", SENSOR_ERROR, reason);
                SENSOR_ERROR.to_string()
            }
        };

        fs::write(&self.path, format!("{}\n{}\n", line1, line2))?;
        info!("Updated display file: {}", self.path.display());
        Ok(())
    }
}

impl StatusSink for StatusFile {
    fn name(&self) -> &'static str {
        "display"
    }

    fn update(&mut self, outcome: &AcquisitionOutcome) -> Result<(), SinkError> {
        self.update_at(outcome, Local::now())
    }
}
