use crate::interpreter::{Field, FieldDelta, FieldValue};
use crate::types::{Db, EqBand, InputIndex, GAIN_RANGE, INPUT_COUNT, SOURCE_RANGE, VOLUME_RANGE};
use serde::{Deserialize, Serialize};

/// Mirrored amplifier state
///
/// Percentages and labels are not stored; they are derived from the dB fields
/// when a [`crate::message::StateView`] is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub connected: bool,
    pub power: bool,
    /// Selected source, 1-5; 0 when unknown
    pub source: u8,
    pub volume_db: Db,
    pub mute: bool,
    pub mix_mode_enabled: bool,
    pub mix_volume_db: Db,
    pub mix_mute: bool,
    /// Gain trim per physical input, index 0 is input 1
    pub input_gain_db: [Db; INPUT_COUNT],
    pub eq_low_db: Db,
    pub eq_mid_db: Db,
    pub eq_high_db: Db,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            connected: false,
            power: false,
            source: 0,
            volume_db: -40,
            mute: false,
            mix_mode_enabled: false,
            mix_volume_db: -40,
            mix_mute: false,
            input_gain_db: [0; INPUT_COUNT],
            eq_low_db: 0,
            eq_mid_db: 0,
            eq_high_db: 0,
        }
    }
}

impl DeviceState {
    pub fn input_gain(&self, input: InputIndex) -> Db {
        self.input_gain_db[input.slot()]
    }

    pub fn eq(&self, band: EqBand) -> Db {
        match band {
            EqBand::Low => self.eq_low_db,
            EqBand::Mid => self.eq_mid_db,
            EqBand::High => self.eq_high_db,
        }
    }

    pub fn volume_percent(&self) -> u8 {
        VOLUME_RANGE.percent(self.volume_db)
    }

    pub fn mix_volume_percent(&self) -> u8 {
        VOLUME_RANGE.percent(self.mix_volume_db)
    }

    pub fn input_gain_percent(&self) -> [u8; INPUT_COUNT] {
        self.input_gain_db.map(|db| GAIN_RANGE.percent(db))
    }
}

/// Owner of the one [`DeviceState`] per bridge
#[derive(Debug, Default)]
pub struct StateStore {
    state: DeviceState,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the current state
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Immutable copy for handing outside the bridge
    pub fn snapshot(&self) -> DeviceState {
        self.state.clone()
    }

    /// Apply a batch of deltas, returning whether anything visibly changed.
    ///
    /// Levels are clamped to their field's range first. A delta whose value type does
    /// not fit its field is ignored.
    pub fn apply(&mut self, deltas: &[FieldDelta]) -> bool {
        let mut changed = false;
        for delta in deltas {
            changed |= self.apply_one(delta);
        }
        changed
    }

    /// Record link state; returns whether it changed
    pub fn set_connected(&mut self, connected: bool) -> bool {
        replace(&mut self.state.connected, connected)
    }

    fn apply_one(&mut self, delta: &FieldDelta) -> bool {
        let state = &mut self.state;
        match (delta.field, delta.value) {
            (Field::Power, FieldValue::Switch(on)) => replace(&mut state.power, on),
            (Field::Mute, FieldValue::Switch(on)) => replace(&mut state.mute, on),
            (Field::MixMode, FieldValue::Switch(on)) => replace(&mut state.mix_mode_enabled, on),
            (Field::MixMute, FieldValue::Switch(on)) => replace(&mut state.mix_mute, on),
            (Field::Source, FieldValue::Level(n)) => {
                replace(&mut state.source, SOURCE_RANGE.clamp(n) as u8)
            }
            (Field::Volume, FieldValue::Level(db)) => {
                replace(&mut state.volume_db, VOLUME_RANGE.clamp(db))
            }
            (Field::MixVolume, FieldValue::Level(db)) => {
                replace(&mut state.mix_volume_db, VOLUME_RANGE.clamp(db))
            }
            (Field::InputGain(input), FieldValue::Level(db)) => replace(
                &mut state.input_gain_db[input.slot()],
                GAIN_RANGE.clamp(db),
            ),
            (Field::Eq(band), FieldValue::Level(db)) => {
                let slot = match band {
                    EqBand::Low => &mut state.eq_low_db,
                    EqBand::Mid => &mut state.eq_mid_db,
                    EqBand::High => &mut state.eq_high_db,
                };
                replace(slot, GAIN_RANGE.clamp(db))
            }
            (field, value) => {
                tracing::debug!("Ignoring {:?} for {:?}", value, field);
                false
            }
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
