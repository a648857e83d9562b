use crate::acquire::{RawReading, ReadingSource};
use crate::util::bits_to_byte;
use futures::stream::StreamExt;
use gpio_cdev::{
    AsyncLineEventHandle, Chip, EventRequestFlags, EventType, Line, LineRequestFlags,
};
use std::path::Path;
use std::time;
use thiserror::Error;

const FRAME_BITS: usize = 40;
// Ack high pulse plus one rising/falling pair per bit.
const FRAME_EDGES: usize = 2 * (FRAME_BITS + 1);
// A full frame takes ~5 ms on the wire.
const READ_DEADLINE: time::Duration = time::Duration::from_millis(50);
// High pulses longer than this (ns) are a 1 bit.
const ONE_BIT_THRESHOLD_NS: u64 = 40_000;

#[derive(Debug, PartialEq)]
pub struct EnvironmentData {
    temp: f64,
    humidity: f64,
}

/// DHT22 on a single GPIO line of a character-device gpio chip.
#[derive(Debug)]
pub struct EnvironmentSensor {
    gpio_pin: u32,
    line: Line,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("expected a 40 bit frame")]
    UnexpectedInput,
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor did not acknowledge the start signal")]
    InvalidAck,
    #[error("event stream ended mid-frame")]
    BadRead,
    #[error("gpio: {0}")]
    GpioError(#[from] gpio_cdev::Error),
    #[error("read timed out")]
    TimeoutError,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{0}")]
    Sensor(#[from] SensorError),
    #[error("{0}")]
    Conversion(#[from] ConversionError),
}

impl EnvironmentSensor {
    pub fn init(chip_path: &Path, gpio_pin: u32) -> Result<Self, SensorError> {
        let mut chip = Chip::new(chip_path)?;
        let line = chip.get_line(gpio_pin)?;

        Ok(EnvironmentSensor { gpio_pin, line })
    }

    pub fn gpio_pin(&self) -> u32 {
        self.gpio_pin
    }

    pub async fn read_env_data(&self) -> Result<EnvironmentData, ReadError> {
        let edges = match tokio::time::timeout(READ_DEADLINE, self.read_frame()).await {
            Ok(result) => result?,
            Err(_) => return Err(SensorError::TimeoutError.into()),
        };

        Ok(EnvironmentData::from_raw_output(&pulses_to_bits(&edges)?)?)
    }

    /// Timestamps (ns) of every edge after the ack's falling edge.
    async fn read_frame(&self) -> Result<Vec<u64>, SensorError> {
        Self::send_start_signal(&self.line).await?;

        let line_evt_handle = self.line.events(
            LineRequestFlags::INPUT,
            EventRequestFlags::BOTH_EDGES,
            "dht-read",
        )?;

        let mut async_events = AsyncLineEventHandle::new(line_evt_handle)?;

        // The sensor acks by pulling the line low. Anything else means we
        // joined mid-frame, so bail rather than decode garbage.
        match async_events.next().await.ok_or(SensorError::BadRead)? {
            Err(e) => Err(SensorError::GpioError(e)),
            Ok(e) if e.event_type() != EventType::FallingEdge => Err(SensorError::InvalidAck),
            Ok(_) => {
                let mut edges: Vec<u64> = Vec::with_capacity(FRAME_EDGES);

                for _ in 0..FRAME_EDGES {
                    let event = async_events.next().await.ok_or(SensorError::BadRead)??;
                    edges.push(event.timestamp());
                }
                Ok(edges)
            }
        }
    }

    async fn send_start_signal(line: &Line) -> Result<(), gpio_cdev::Error> {
        // Datasheet asks for >= 1 ms low. 2 ms is more reliable on a busy Pi.
        let handle = line.request(LineRequestFlags::OUTPUT, 1, "dht-start")?;

        handle.set_value(0)?;
        tokio::time::sleep(time::Duration::from_millis(2)).await;
        Ok(())
    }
}

/// Decodes the edges that follow the ack's falling edge.
///
/// The first rising/falling pair is the sensor's 80 us "get ready" high pulse
/// and carries no data. Each later pair brackets the high half of one bit:
/// ~27 us is a 0, ~70 us is a 1.
pub fn pulses_to_bits(edges: &[u64]) -> Result<Vec<u8>, ConversionError> {
    if edges.len() != FRAME_EDGES {
        return Err(ConversionError::UnexpectedInput);
    }

    Ok(edges[2..]
        .chunks(2)
        .map(|pair| match pair[1].saturating_sub(pair[0]) {
            width if width < ONE_BIT_THRESHOLD_NS => 0,
            _ => 1,
        })
        .collect())
}

impl ReadingSource for EnvironmentSensor {
    type Error = ReadError;

    async fn read(&mut self) -> Result<RawReading, ReadError> {
        let data = self.read_env_data().await?;

        Ok(RawReading {
            temperature: Some(data.temperature()),
            humidity: Some(data.humidity()),
        })
    }
}

impl EnvironmentData {
    pub fn from_raw_output(output: &[u8]) -> Result<Self, ConversionError> {
        if output.len() != FRAME_BITS {
            return Err(ConversionError::UnexpectedInput);
        }

        let bytes: Vec<u8> = output.chunks(8).map(bits_to_byte).collect();

        Self::validate(&bytes)?;

        let humidity = u16::from_be_bytes([bytes[0], bytes[1]]);
        let temp = u16::from_be_bytes([bytes[2], bytes[3]]);
        // Bit 15 of the temperature word is a sign flag, not two's complement.
        let magnitude = f64::from(temp & 0x7FFF) / 10.0;

        Ok(EnvironmentData {
            humidity: f64::from(humidity) / 10.0,
            temp: if temp & 0x8000 != 0 { -magnitude } else { magnitude },
        })
    }

    fn validate(bytes: &[u8]) -> Result<(), ConversionError> {
        let checksum = bytes.last().ok_or(ConversionError::UnexpectedInput)?;
        let sum = bytes[0..4].iter().fold(0_u8, |sum, &byte| sum.wrapping_add(byte));

        if *checksum != sum {
            return Err(ConversionError::BadChecksum);
        }

        Ok(())
    }

    pub fn temperature(&self) -> f64 {
        self.temp
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }
}
