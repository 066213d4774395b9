//! Response interpretation: one device record in, field deltas out.
//!
//! Every record the device emits is a comma-separated list of `KEY=VALUE` tokens behind
//! the unit marker, e.g. `NEUNIT=1,VOL=-20` or `NEUNIT=1,SETTINGS=INPUT,INPUT=2,GAIN=+3`.
//! Keys are looked up in [`TOKEN_FIELDS`]; adding a field is a table entry, not new
//! parsing code. The one compound form is an `INPUT=n` token immediately followed by
//! `GAIN=g`, which addresses the gain trim of input `n`.

use crate::error::{BridgeError, Result};
use crate::protocol::UNIT_MARKER;
use crate::types::{Db, EqBand, InputIndex};

/// Marker the device uses for rejected commands
const ERROR_MARKER: &str = "ERROR";

/// A state field the device reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Power,
    Source,
    Volume,
    Mute,
    MixMode,
    MixVolume,
    MixMute,
    InputGain(InputIndex),
    Eq(EqBand),
}

/// Decoded value of a field token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Switch(bool),
    Level(Db),
}

/// A single field-level change extracted from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDelta {
    pub field: Field,
    pub value: FieldValue,
}

impl FieldDelta {
    pub fn switch(field: Field, on: bool) -> Self {
        Self {
            field,
            value: FieldValue::Switch(on),
        }
    }

    pub fn level(field: Field, db: Db) -> Self {
        Self {
            field,
            value: FieldValue::Level(db),
        }
    }
}

/// How a token's value is written on the wire
#[derive(Debug, Clone, Copy)]
enum Encoding {
    OnOff,
    TrueFalse,
    Signed,
}

/// Key → field mapping for the single-valued tokens
const TOKEN_FIELDS: &[(&str, Field, Encoding)] = &[
    ("POWER", Field::Power, Encoding::OnOff),
    ("VOL", Field::Volume, Encoding::Signed),
    ("INPUT", Field::Source, Encoding::Signed),
    ("MUTE", Field::Mute, Encoding::OnOff),
    ("MIX", Field::MixMode, Encoding::TrueFalse),
    ("MIXVOL", Field::MixVolume, Encoding::Signed),
    ("MIXMUTE", Field::MixMute, Encoding::OnOff),
    ("EQLOW", Field::Eq(EqBand::Low), Encoding::Signed),
    ("EQMID", Field::Eq(EqBand::Mid), Encoding::Signed),
    ("EQHIGH", Field::Eq(EqBand::High), Encoding::Signed),
];

/// Interpret one complete record.
///
/// Records without the unit marker yield no deltas. Error records come back as
/// [`BridgeError::DeviceError`] and must not be applied. Malformed tokens are logged
/// and skipped; the rest of the record is still used.
pub fn interpret(record: &str) -> Result<Vec<FieldDelta>> {
    if record.contains(ERROR_MARKER) {
        return Err(BridgeError::DeviceError {
            record: record.to_string(),
        });
    }

    let Some(start) = record.find(UNIT_MARKER) else {
        tracing::debug!("Ignoring record without unit marker: {}", record);
        return Ok(Vec::new());
    };

    let tokens: Vec<(&str, &str)> = record[start + UNIT_MARKER.len()..]
        .split(',')
        .filter_map(|token| token.trim().split_once('='))
        .collect();

    let mut deltas = Vec::new();
    let mut settings_block: Option<&str> = None;
    let mut i = 0;

    while i < tokens.len() {
        let (key, value) = tokens[i];
        i += 1;

        if key == "SETTINGS" {
            settings_block = Some(value);
            continue;
        }

        if key == "INPUT" {
            if let Some(&("GAIN", gain)) = tokens.get(i) {
                i += 1;
                match input_gain(value, gain) {
                    Ok(Some(delta)) => deltas.push(delta),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("{}", e),
                }
                continue;
            }
            // Inside an input settings block INPUT= selects which input, not the source
            if settings_block == Some("INPUT") {
                continue;
            }
        }

        let Some(&(_, field, encoding)) = TOKEN_FIELDS.iter().find(|(name, _, _)| *name == key)
        else {
            continue;
        };

        match decode(key, value, encoding) {
            Ok(Some(decoded)) => deltas.push(FieldDelta { field, value: decoded }),
            Ok(None) => {}
            Err(e) => tracing::warn!("{}", e),
        }
    }

    Ok(deltas)
}

/// Decode a token value; `?` (a query echo) decodes to nothing
fn decode(key: &str, value: &str, encoding: Encoding) -> Result<Option<FieldValue>> {
    let value = value.trim();
    if value == "?" {
        return Ok(None);
    }

    let decoded = match (encoding, value) {
        (Encoding::OnOff, "ON") | (Encoding::TrueFalse, "TRUE") => FieldValue::Switch(true),
        (Encoding::OnOff, "OFF") | (Encoding::TrueFalse, "FALSE") => FieldValue::Switch(false),
        (Encoding::Signed, _) => FieldValue::Level(parse_signed(key, value)?),
        _ => return Err(malformed(key, value)),
    };

    Ok(Some(decoded))
}

fn input_gain(input: &str, gain: &str) -> Result<Option<FieldDelta>> {
    if gain.trim() == "?" {
        return Ok(None);
    }

    let number = parse_signed("INPUT", input)?;
    let db = parse_signed("GAIN", gain)?;

    match InputIndex::new(number as i64) {
        Ok(index) => Ok(Some(FieldDelta::level(Field::InputGain(index), db))),
        Err(_) => {
            tracing::debug!("Discarding gain for unknown input {}", number);
            Ok(None)
        }
    }
}

fn parse_signed(key: &str, value: &str) -> Result<Db> {
    value.trim().parse::<Db>().map_err(|_| malformed(key, value))
}

fn malformed(key: &str, value: &str) -> BridgeError {
    BridgeError::MalformedResponse {
        token: format!("{}={}", key, value),
    }
}
