use crate::calibration::CalibrationOffsets;
use crate::pins::{BoardPin, PinError};
use envconfig::Envconfig;
use log::{error, warn};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_INFLUX_TIMEOUT_SECS: u64 = 10;

/** Raw environment, read once at startup. Numbers stay text until `Settings` parses them. */
#[derive(Envconfig)]
pub struct AppConfig {
    #[envconfig(from = "LOG_INTERVAL", default = "60")]
    pub log_interval: String,
    #[envconfig(from = "DHT_PIN", default = "D4")]
    pub dht_pin: String,
    #[envconfig(from = "DHT_RETRIES", default = "3")]
    pub dht_retries: String,
    #[envconfig(from = "DHT_SENSOR_NAME")]
    pub dht_sensor_name: Option<String>,
    #[envconfig(from = "DHT_SENSOR_TEMP_CORRECTION", default = "0")]
    pub temp_correction: String,
    #[envconfig(from = "DHT_SENSOR_HUM_CORRECTION", default = "0")]
    pub hum_correction: String,
    #[envconfig(from = "INFLUXDB_URL", default = "http://influxdb:8086")]
    pub influxdb_url: String,
    #[envconfig(from = "INFLUXDB_TOKEN", default = "my_secret_token")]
    pub influxdb_token: String,
    #[envconfig(from = "INFLUXDB_ORG", default = "my_org")]
    pub influxdb_org: String,
    #[envconfig(from = "INFLUXDB_BUCKET", default = "sensor_data")]
    pub influxdb_bucket: String,
    #[envconfig(from = "INFLUXDB_TIMEOUT_SECS", default = "10")]
    pub influxdb_timeout_secs: String,
    #[envconfig(from = "DISPLAY_SENSOR_LABEL", default = "??")]
    pub display_label: String,
    #[envconfig(from = "DISPLAY_SENSOR_FILE", default = "??")]
    pub display_file: String,
    #[envconfig(from = "DATA_ROOT", default = "/app/data")]
    pub data_root: String,
    #[envconfig(from = "DISPLAY_ROOT", default = "/app/display")]
    pub display_root: String,
    #[envconfig(from = "GPIO_CHIP", default = "/dev/gpiochip0")]
    pub gpio_chip: String,
}

/// Who is measuring: stamped on every CSV header and every remote point.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorIdentity {
    pub name: String,
    pub pin: BoardPin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub label: String,
    pub path: PathBuf,
}

/// Resolved, immutable process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub identity: SensorIdentity,
    pub interval: Duration,
    pub retries: u32,
    pub offsets: CalibrationOffsets,
    pub influx: InfluxSettings,
    pub display: DisplaySettings,
    pub data_root: PathBuf,
    pub gpio_chip: PathBuf,
}

impl Settings {
    /// Fails only on an unknown pin name. Bad numbers fall back with a log line.
    pub fn from_config(config: AppConfig) -> Result<Self, PinError> {
        let pin: BoardPin = config.dht_pin.parse()?;
        let name = config
            .dht_sensor_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("sensor_{}", config.dht_pin));

        let interval_secs =
            parse_or("LOG_INTERVAL", &config.log_interval, DEFAULT_INTERVAL_SECS).max(1);
        let retries = parse_or("DHT_RETRIES", &config.dht_retries, DEFAULT_RETRIES).max(1);
        let timeout_secs = parse_or(
            "INFLUXDB_TIMEOUT_SECS",
            &config.influxdb_timeout_secs,
            DEFAULT_INFLUX_TIMEOUT_SECS,
        );

        let display_root = PathBuf::from(config.display_root);

        Ok(Settings {
            identity: SensorIdentity { name, pin },
            interval: Duration::from_secs(interval_secs),
            retries,
            offsets: CalibrationOffsets {
                temperature: parse_correction("DHT_SENSOR_TEMP_CORRECTION", &config.temp_correction),
                humidity: parse_correction("DHT_SENSOR_HUM_CORRECTION", &config.hum_correction),
            },
            influx: InfluxSettings {
                url: config.influxdb_url.trim_end_matches('/').to_string(),
                token: config.influxdb_token,
                org: config.influxdb_org,
                bucket: config.influxdb_bucket,
                timeout: Duration::from_secs(timeout_secs),
            },
            display: DisplaySettings {
                label: config.display_label,
                path: display_root.join(config.display_file),
            },
            data_root: PathBuf::from(config.data_root),
            gpio_chip: PathBuf::from(config.gpio_chip),
        })
    }

    /// `<data-root>/<sensor-name>`
    pub fn sensor_data_dir(&self) -> PathBuf {
        self.data_root.join(&self.identity.name)
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(var: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("{} value '{}' is not valid. Using {}.", var, raw, default);
        default
    })
}

fn parse_correction(var: &str, raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            error!("{} value can not be set to float. Set to 0.", var);
            0.0
        }
    }
}
