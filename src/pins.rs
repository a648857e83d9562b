use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raspberry Pi header names and the BCM line offsets they map to on `/dev/gpiochip0`.
const BOARD_PINS: &[(&str, u32)] = &[
    ("D0", 0),
    ("D1", 1),
    ("D2", 2),
    ("D3", 3),
    ("D4", 4),
    ("D5", 5),
    ("D6", 6),
    ("D7", 7),
    ("D8", 8),
    ("D9", 9),
    ("D10", 10),
    ("D11", 11),
    ("D12", 12),
    ("D13", 13),
    ("D14", 14),
    ("D15", 15),
    ("D16", 16),
    ("D17", 17),
    ("D18", 18),
    ("D19", 19),
    ("D20", 20),
    ("D21", 21),
    ("D22", 22),
    ("D23", 23),
    ("D24", 24),
    ("D25", 25),
    ("D26", 26),
    ("D27", 27),
    ("SDA", 2),
    ("SCL", 3),
    ("CE1", 7),
    ("CE0", 8),
    ("MISO", 9),
    ("MOSI", 10),
    ("SCK", 11),
    ("SCLK", 11),
    ("TXD", 14),
    ("TX", 14),
    ("RXD", 15),
    ("RX", 15),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PinError {
    #[error("Invalid GPIO pin specified: {0}")]
    Unknown(String),
}

/// A validated header pin: the name it was configured with and its GPIO line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardPin {
    name: String,
    line: u32,
}

impl BoardPin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

impl FromStr for BoardPin {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();

        BOARD_PINS
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|&(name, line)| BoardPin {
                name: name.to_string(),
                line,
            })
            .ok_or_else(|| PinError::Unknown(s.to_string()))
    }
}

// Renders like the line number so that log headers record the physical line.
impl fmt::Display for BoardPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)
    }
}
