//! InfluxDB v2 writer over the HTTP line-protocol API.

use super::{SampleSink, SinkError};
use crate::calibration::Sample;
use crate::config::InfluxSettings;
use log::{error, info, warn};
use std::fmt::Write as _;
use ureq::{Agent, AgentBuilder};

pub const MEASUREMENT: &str = "temperature_humidity";

/// A single line-protocol point. Timestamps are milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, f64)>,
    timestamp_ms: Option<i64>,
}

impl Point {
    pub fn new(measurement: &str) -> Self {
        Point {
            measurement: measurement.to_string(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ms: None,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    pub fn field(mut self, key: &str, value: f64) -> Self {
        self.fields.push((key.to_string(), value));
        self
    }

    pub fn timestamp_ms(mut self, ms: i64) -> Self {
        self.timestamp_ms = Some(ms);
        self
    }

    pub fn from_sample(sample: &Sample, sensor_id: &str) -> Self {
        Point::new(MEASUREMENT)
            .tag("sensor_id", sensor_id)
            .field("temperature", sample.temperature())
            .field("humidity", sample.humidity())
            .timestamp_ms(sample.taken_at_utc().timestamp_millis())
    }

    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));

        if let Some(ms) = self.timestamp_ms {
            let _ = write!(line, " {}", ms);
        }

        line
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A live handle to one InfluxDB org/bucket.
pub struct InfluxClient {
    agent: Agent,
    write_url: String,
    authorization: String,
    org: String,
    bucket: String,
}

impl InfluxClient {
    /// Builds the agent and checks `/health` so a dead endpoint shows up at startup.
    pub fn connect(settings: &InfluxSettings) -> Result<Self, SinkError> {
        let agent = AgentBuilder::new()
            .timeout_connect(settings.timeout)
            .timeout(settings.timeout)
            .build();

        agent
            .get(&format!("{}/health", settings.url))
            .call()
            .map_err(http_error)?;

        Ok(InfluxClient {
            agent,
            write_url: format!("{}/api/v2/write", settings.url),
            authorization: format!("Token {}", settings.token),
            org: settings.org.clone(),
            bucket: settings.bucket.clone(),
        })
    }

    pub fn write_point(&self, point: &Point) -> Result<(), SinkError> {
        self.agent
            .post(&self.write_url)
            .query("org", &self.org)
            .query("bucket", &self.bucket)
            .query("precision", "ms")
            .set("Authorization", &self.authorization)
            .set("Content-Type", "text/plain; charset=utf-8")
            .send_string(&point.to_line_protocol())
            .map_err(http_error)?;
        Ok(())
    }
}

fn http_error(e: ureq::Error) -> SinkError {
    match e {
        ureq::Error::Status(status, response) => SinkError::Rejected {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => SinkError::Http(transport.to_string()),
    }
}

/// The remote sink. Starts disconnected if InfluxDB was unreachable at boot and
/// tries to connect again at the start of every write.
pub struct RemoteMetricsWriter {
    settings: InfluxSettings,
    sensor_id: String,
    client: Option<InfluxClient>,
}

impl RemoteMetricsWriter {
    pub fn new(settings: InfluxSettings, sensor_id: &str) -> Self {
        info!(
            "Initializing InfluxDB connection: URL: {} ORG: {}",
            settings.url, settings.org
        );
        let client = match InfluxClient::connect(&settings) {
            Ok(client) => {
                info!("Connected to InfluxDB successfully.");
                Some(client)
            }
            Err(e) => {
                error!("Failed to connect to InfluxDB: {}", e);
                None
            }
        };

        RemoteMetricsWriter {
            settings,
            sensor_id: sensor_id.to_string(),
            client,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn client(&mut self) -> Result<&InfluxClient, SinkError> {
        if self.client.is_none() {
            match InfluxClient::connect(&self.settings) {
                Ok(client) => {
                    info!("Reconnected to InfluxDB.");
                    self.client = Some(client);
                }
                Err(e) => {
                    warn!("InfluxDB still unavailable: {}", e);
                    return Err(SinkError::Disconnected);
                }
            }
        }

        self.client.as_ref().ok_or(SinkError::Disconnected)
    }
}

impl SampleSink for RemoteMetricsWriter {
    fn name(&self) -> &'static str {
        "DB"
    }

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let point = Point::from_sample(sample, &self.sensor_id);
        info!(
            "Writing to DB: Temp={}°C, Humidity={}%, Timestamp={}",
            sample.temperature(),
            sample.humidity(),
            sample.utc_iso()
        );

        self.client()?.write_point(&point)?;

        info!(
            "Successfully written to DB: Temp={}°C, Humidity={}% with tag={} at {}",
            sample.temperature(),
            sample.humidity(),
            self.sensor_id,
            sample.utc_iso()
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            info!("InfluxDB connection closed.");
        }
    }
}
