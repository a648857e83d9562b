use super::{SampleSink, SinkError};
use crate::calibration::Sample;
use crate::config::SensorIdentity;
use chrono::{Local, NaiveDate};
use log::info;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const COLUMNS: &str = "date,time,temperature,humidity";
// Rows end in CRLF, matching files written by earlier versions of the logger.
const EOL: &str = "\r\n";

/// One CSV per calendar day under `<data-root>/<sensor-name>/`.
pub struct DailyCsvLog {
    dir: PathBuf,
    header: String,
}

impl DailyCsvLog {
    pub fn new(dir: impl Into<PathBuf>, identity: &SensorIdentity, org: &str, bucket: &str) -> Self {
        DailyCsvLog {
            dir: dir.into(),
            header: format!(
                "# Sensor Name: {}, Pin: {}, InfluxDB Org: {}, InfluxDB Bucket: {}",
                identity.name, identity.pin, org, bucket
            ),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<YYYY-MM-DD>.csv`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", date.format("%Y-%m-%d")))
    }

    /// Creates the sensor directory and today's file so it exists before the first reading.
    pub fn ensure_today(&self) -> Result<PathBuf, SinkError> {
        let path = self.path_for(Local::now().date_naive());
        self.open(&path)?;
        Ok(path)
    }

    // The header goes in whenever the file is empty, so a file that was
    // created but never written still gets one.
    fn open(&self, path: &Path) -> Result<fs::File, SinkError> {
        fs::create_dir_all(&self.dir)?;

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        if file.metadata()?.len() == 0 {
            info!("Creating new CSV file: {}", path.display());
            write!(file, "{}{}{}{}", self.header, EOL, COLUMNS, EOL)?;
        }

        Ok(file)
    }
}

impl SampleSink for DailyCsvLog {
    fn name(&self) -> &'static str {
        "CSV"
    }

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let taken_at = sample.taken_at();
        let path = self.path_for(taken_at.date_naive());
        let date = taken_at.format("%Y-%m-%d");
        let time = taken_at.format("%H:%M:%S");

        let mut file = self.open(&path)?;
        write!(
            file,
            "{},{},{:.1},{:.1}{}",
            date,
            time,
            sample.temperature(),
            sample.humidity(),
            EOL
        )?;

        info!(
            "Successfully written to CSV: {} {} - Temp={:.1}°C, Humidity={:.1}% (CSV filename: {})",
            date,
            time,
            sample.temperature(),
            sample.humidity(),
            path.display()
        );
        Ok(())
    }
}
