mod acquire;
mod calibration;
mod config;
mod pins;
mod scheduler;
mod sinks;
mod temperature_humidity;
mod util;

use acquire::RetryAcquirer;
use anyhow::Context;
use calibration::Calibrator;
use config::{AppConfig, Settings};
use envconfig::Envconfig;
use log::{error, info, warn};
use scheduler::{CycleScheduler, Sinks};
use sinks::append_log::DailyCsvLog;
use sinks::display::StatusFile;
use sinks::influx::RemoteMetricsWriter;
use std::io::Write;
use temperature_humidity::EnvironmentSensor;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    info!("Starting DHT logger...");

    let config = AppConfig::init_from_env().context("reading environment")?;
    let settings = Settings::from_config(config)?;
    log_settings(&settings);

    let csv_log = DailyCsvLog::new(
        settings.sensor_data_dir(),
        &settings.identity,
        &settings.influx.org,
        &settings.influx.bucket,
    );
    match csv_log.ensure_today() {
        Ok(path) => info!("CSV file ready: {}", path.display()),
        Err(e) => error!("Could not prepare CSV file in {}: {}", csv_log.dir().display(), e),
    }

    info!("Initializing DHT sensor...");
    let pin = &settings.identity.pin;
    let sensor = EnvironmentSensor::init(&settings.gpio_chip, pin.line()).with_context(|| {
        format!(
            "opening GPIO line {} ({}) on {}",
            pin.line(),
            pin.name(),
            settings.gpio_chip.display()
        )
    })?;
    info!("DHT sensor initialized on GPIO line {}.", sensor.gpio_pin());

    let remote = RemoteMetricsWriter::new(settings.influx.clone(), &settings.identity.name);
    if !remote.is_connected() {
        warn!("InfluxDB writes will be retried every cycle until it is reachable.");
    }
    let display = StatusFile::new(&settings.display);
    info!("Display file: {}", display.path().display());

    let mut scheduler = CycleScheduler::new(
        RetryAcquirer::new(sensor, settings.retries),
        Calibrator::new(settings.offsets),
        Sinks {
            log: Box::new(csv_log),
            remote: Box::new(remote),
            display: Box::new(display),
        },
        settings.interval,
    );

    let (stop, shutdown) = watch::channel(false);
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
            _ = terminate.recv() => info!("Termination requested"),
        }
        let _ = stop.send(true);
    });

    let cycles = scheduler.run(shutdown).await;
    info!("Completed {} cycles ({:?})", cycles, scheduler.state());

    Ok(())
}

fn log_settings(settings: &Settings) {
    let identity = &settings.identity;
    info!("Sensor name: {}", identity.name);
    info!("Using DHT_PIN: {} (GPIO line {})", identity.pin.name(), identity.pin.line());
    info!("Logging interval: {} seconds", settings.interval.as_secs());
    info!("Number of retries for sensor read: {}", settings.retries);
    if settings.offsets.temperature != 0.0 {
        info!("Correction of temperature set to: {}", settings.offsets.temperature);
    }
    if settings.offsets.humidity != 0.0 {
        info!("Correction of humidity set to: {}", settings.offsets.humidity);
    }
    info!("InfluxDB url: {}", settings.influx.url);
    info!("InfluxDB organization: {}", settings.influx.org);
    info!("InfluxDB bucket: {}", settings.influx.bucket);
    info!("Data directory: {}", settings.sensor_data_dir().display());
}
