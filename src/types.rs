use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Level in decibels as the device reports it
pub type Db = i32;

/// Inclusive dB range of a level field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRange {
    pub min: Db,
    pub max: Db,
}

/// Master and mix volume
pub const VOLUME_RANGE: DbRange = DbRange { min: -70, max: 12 };

/// Input gain and tone bands
pub const GAIN_RANGE: DbRange = DbRange { min: -12, max: 12 };

/// Selectable sources; 0 means unknown
pub const SOURCE_RANGE: DbRange = DbRange { min: 0, max: 5 };

/// Number of physical inputs with a gain trim
pub const INPUT_COUNT: usize = 4;

impl DbRange {
    /// Clamp a value into the range
    pub fn clamp(&self, value: Db) -> Db {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min as i64..=self.max as i64).contains(&value)
    }

    /// Width of the range in dB
    pub fn span(&self) -> Db {
        self.max - self.min
    }

    /// Display percentage of a value within this range, 0..=100
    pub fn percent(&self, value: Db) -> u8 {
        let scaled = (value - self.min) as f64 * 100.0 / self.span() as f64;
        scaled.round().clamp(0.0, 100.0) as u8
    }
}

/// Physical input number, 1 through 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct InputIndex(u8);

impl InputIndex {
    pub fn new(number: i64) -> Result<Self> {
        if (1..=INPUT_COUNT as i64).contains(&number) {
            Ok(Self(number as u8))
        } else {
            Err(BridgeError::InvalidParameter(format!(
                "input must be between 1 and {}, got {}",
                INPUT_COUNT, number
            )))
        }
    }

    /// The 1-based input number
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Zero-based slot into per-input arrays
    pub fn slot(&self) -> usize {
        (self.0 - 1) as usize
    }
}

impl TryFrom<i64> for InputIndex {
    type Error = BridgeError;

    fn try_from(number: i64) -> Result<Self> {
        Self::new(number)
    }
}

impl From<InputIndex> for u8 {
    fn from(index: InputIndex) -> u8 {
        index.0
    }
}

impl fmt::Display for InputIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output tone band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    /// Wire key, e.g. `EQLOW`
    pub fn key(&self) -> &'static str {
        match self {
            EqBand::Low => "EQLOW",
            EqBand::Mid => "EQMID",
            EqBand::High => "EQHIGH",
        }
    }
}

/// Direction of a relative step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn delta(&self) -> Db {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

/// Human-readable dB label: `+3dB`, `0dB`, `-20dB`
pub fn db_label(value: Db) -> String {
    if value > 0 {
        format!("+{}dB", value)
    } else {
        format!("{}dB", value)
    }
}
