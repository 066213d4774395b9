use crate::connection::ConnectionStatus;
use crate::error::{BridgeError, Result};
use crate::state::DeviceState;
use crate::types::{Db, DbRange, Direction, EqBand, InputIndex, GAIN_RANGE, VOLUME_RANGE};
use serde::{Deserialize, Serialize};

/// Something a client asks the bridge to do
///
/// Numeric parameters are kept as raw integers so out-of-range values reach
/// validation and come back as [`BridgeError::InvalidParameter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    PowerOn,
    PowerOff,
    PowerToggle,
    SourceSelect { source: i64 },
    VolumeUp,
    VolumeDown,
    VolumeSet { value: i64 },
    MuteOn,
    MuteOff,
    MuteToggle,
    MixModeToggle,
    MixVolumeUp,
    MixVolumeDown,
    MixVolumeSet { value: i64 },
    MixMuteToggle,
    InputGainUp { input: i64 },
    InputGainDown { input: i64 },
    InputGainSet { input: i64, value: i64 },
    EqAdjust { band: EqBand, direction: Direction },
    EqSet { band: EqBand, value: i64 },
    PollStatus,
    GetState,
    Connect,
    Disconnect,
    ConnectionToggle,
    ConnectionStatus,
    Ping,
    HoldStart {
        control: HoldControl,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<i64>,
    },
    HoldStop {
        control: HoldControl,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<i64>,
    },
}

/// Controls that support press-and-hold repeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldControl {
    VolumeUp,
    VolumeDown,
    MixVolumeUp,
    MixVolumeDown,
    InputGainUp,
    InputGainDown,
}

/// Level a relative step moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepTarget {
    Volume,
    MixVolume,
    InputGain(InputIndex),
    Eq(EqBand),
}

/// One relative adjustment; also the key of a hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    pub target: StepTarget,
    pub direction: Direction,
}

impl StepTarget {
    pub fn range(&self) -> DbRange {
        match self {
            StepTarget::Volume | StepTarget::MixVolume => VOLUME_RANGE,
            StepTarget::InputGain(_) | StepTarget::Eq(_) => GAIN_RANGE,
        }
    }

    /// Current value from the mirrored state
    pub fn current(&self, state: &DeviceState) -> Db {
        match self {
            StepTarget::Volume => state.volume_db,
            StepTarget::MixVolume => state.mix_volume_db,
            StepTarget::InputGain(input) => state.input_gain(*input),
            StepTarget::Eq(band) => state.eq(*band),
        }
    }
}

impl Step {
    /// Clamped next value, or `None` when already at the range edge
    pub fn next_value(&self, state: &DeviceState) -> Option<Db> {
        let current = self.target.current(state);
        let next = self.target.range().clamp(current + self.direction.delta());
        (next != current).then_some(next)
    }
}

impl HoldControl {
    pub(crate) fn step(&self, input: Option<i64>) -> Result<Step> {
        let (target, direction) = match self {
            HoldControl::VolumeUp => (StepTarget::Volume, Direction::Up),
            HoldControl::VolumeDown => (StepTarget::Volume, Direction::Down),
            HoldControl::MixVolumeUp => (StepTarget::MixVolume, Direction::Up),
            HoldControl::MixVolumeDown => (StepTarget::MixVolume, Direction::Down),
            HoldControl::InputGainUp | HoldControl::InputGainDown => {
                let number = input.ok_or_else(|| {
                    BridgeError::InvalidParameter("input gain hold requires an input".to_string())
                })?;
                let direction = if *self == HoldControl::InputGainUp {
                    Direction::Up
                } else {
                    Direction::Down
                };
                (StepTarget::InputGain(InputIndex::new(number)?), direction)
            }
        };
        Ok(Step { target, direction })
    }
}

impl Action {
    /// Check every parameter before anything touches the device
    pub fn validate(&self) -> Result<()> {
        match self {
            Action::SourceSelect { source } => source_number(*source).map(|_| ()),
            Action::VolumeSet { value } | Action::MixVolumeSet { value } => {
                level(VOLUME_RANGE, "volume", *value).map(|_| ())
            }
            Action::InputGainSet { input, value } => {
                InputIndex::new(*input)?;
                level(GAIN_RANGE, "gain", *value).map(|_| ())
            }
            Action::EqSet { value, .. } => level(GAIN_RANGE, "eq", *value).map(|_| ()),
            Action::InputGainUp { input } | Action::InputGainDown { input } => {
                InputIndex::new(*input).map(|_| ())
            }
            Action::HoldStart { control, input } | Action::HoldStop { control, input } => {
                control.step(*input).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    /// The relative step this action performs, if it is one
    pub(crate) fn step(&self) -> Result<Option<Step>> {
        let step = |target, direction| Ok(Some(Step { target, direction }));
        match self {
            Action::VolumeUp => step(StepTarget::Volume, Direction::Up),
            Action::VolumeDown => step(StepTarget::Volume, Direction::Down),
            Action::MixVolumeUp => step(StepTarget::MixVolume, Direction::Up),
            Action::MixVolumeDown => step(StepTarget::MixVolume, Direction::Down),
            Action::InputGainUp { input } => {
                step(StepTarget::InputGain(InputIndex::new(*input)?), Direction::Up)
            }
            Action::InputGainDown { input } => {
                step(StepTarget::InputGain(InputIndex::new(*input)?), Direction::Down)
            }
            Action::EqAdjust { band, direction } => step(StepTarget::Eq(*band), *direction),
            _ => Ok(None),
        }
    }
}

pub(crate) fn source_number(source: i64) -> Result<u8> {
    if (1..=5).contains(&source) {
        Ok(source as u8)
    } else {
        Err(BridgeError::InvalidParameter(format!(
            "source must be between 1 and 5, got {}",
            source
        )))
    }
}

pub(crate) fn level(range: DbRange, what: &str, value: i64) -> Result<Db> {
    if range.contains(value) {
        Ok(value as Db)
    } else {
        Err(BridgeError::InvalidParameter(format!(
            "{} must be between {} and {} dB, got {}",
            what, range.min, range.max, value
        )))
    }
}

/// Synchronous answer to a submitted action
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The action was accepted; results arrive through the state feed
    Accepted,
    State(DeviceState),
    ConnectionStatus(ConnectionStatus),
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_out_of_range_is_invalid() {
        let err = Action::SourceSelect { source: 7 }.validate().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParameter(_)));
        assert!(Action::SourceSelect { source: 0 }.validate().is_err());
        assert!(Action::SourceSelect { source: 5 }.validate().is_ok());
    }

    #[test]
    fn absolute_levels_are_range_checked() {
        assert!(Action::VolumeSet { value: -70 }.validate().is_ok());
        assert!(Action::VolumeSet { value: 13 }.validate().is_err());
        assert!(Action::EqSet { band: EqBand::Low, value: -13 }.validate().is_err());
        assert!(Action::InputGainSet { input: 5, value: 0 }.validate().is_err());
    }

    #[test]
    fn input_gain_hold_needs_input() {
        let hold = Action::HoldStart {
            control: HoldControl::InputGainUp,
            input: None,
        };
        assert!(hold.validate().is_err());

        let step = HoldControl::InputGainDown.step(Some(2)).unwrap();
        assert_eq!(step.target, StepTarget::InputGain(InputIndex::new(2).unwrap()));
        assert_eq!(step.direction, Direction::Down);
    }

    #[test]
    fn step_stops_at_range_edge() {
        let mut state = DeviceState::default();
        let up = Step {
            target: StepTarget::Volume,
            direction: Direction::Up,
        };
        assert_eq!(up.next_value(&state), Some(-39));

        state.volume_db = 12;
        assert_eq!(up.next_value(&state), None);

        state.eq_high_db = -12;
        let down = Step {
            target: StepTarget::Eq(EqBand::High),
            direction: Direction::Down,
        };
        assert_eq!(down.next_value(&state), None);
    }
}
