use crate::types::{Db, EqBand, InputIndex};
use std::fmt;

/// Unit prefix every record carries
pub const UNIT_MARKER: &str = "NEUNIT=1,";

/// Record separator
pub const RECORD_SEPARATOR: u8 = b'\r';

/// Outbound device command, either a set or a `?` query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Power(bool),
    PowerQuery,
    Volume(Db),
    VolumeQuery,
    Source(u8),
    SourceQuery,
    Mute(bool),
    MuteQuery,
    MixMode(bool),
    MixModeQuery,
    MixVolume(Db),
    MixVolumeQuery,
    MixMute(bool),
    MixMuteQuery,
    InputGain(InputIndex, Db),
    InputGainQuery(InputIndex),
    Eq(EqBand, Db),
    EqQuery(EqBand),
}

impl Command {
    /// The bare token, without unit prefix or separator
    pub fn token(&self) -> String {
        match self {
            Command::Power(on) => format!("POWER={}", on_off(*on)),
            Command::PowerQuery => "POWER=?".to_string(),
            Command::Volume(db) => format!("VOL={}", db),
            Command::VolumeQuery => "VOL=?".to_string(),
            Command::Source(n) => format!("INPUT={}", n),
            Command::SourceQuery => "INPUT=?".to_string(),
            Command::Mute(on) => format!("MUTE={}", on_off(*on)),
            Command::MuteQuery => "MUTE=?".to_string(),
            // Mix mode lives in the input settings block of input 1
            Command::MixMode(on) => {
                format!("SETTINGS=INPUT,INPUT=1,MIX={}", if *on { "TRUE" } else { "FALSE" })
            }
            Command::MixModeQuery => "SETTINGS=INPUT,INPUT=1,MIX=?".to_string(),
            Command::MixVolume(db) => format!("MIXVOL={}", db),
            Command::MixVolumeQuery => "MIXVOL=?".to_string(),
            Command::MixMute(on) => format!("MIXMUTE={}", on_off(*on)),
            Command::MixMuteQuery => "MIXMUTE=?".to_string(),
            Command::InputGain(input, db) => {
                format!("SETTINGS=INPUT,INPUT={},GAIN={}", input, signed(*db))
            }
            Command::InputGainQuery(input) => format!("SETTINGS=INPUT,INPUT={},GAIN=?", input),
            Command::Eq(band, db) => format!("SETTINGS=OUTPUT,{}={}", band.key(), signed(*db)),
            Command::EqQuery(band) => format!("SETTINGS=OUTPUT,{}=?", band.key()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Gain and tone values carry an explicit plus sign
fn signed(db: Db) -> String {
    if db > 0 {
        format!("+{}", db)
    } else {
        db.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_has_no_plus_sign() {
        assert_eq!(Command::Volume(-20).token(), "VOL=-20");
        assert_eq!(Command::Volume(0).token(), "VOL=0");
        assert_eq!(Command::Volume(6).token(), "VOL=6");
    }

    #[test]
    fn gain_and_eq_are_signed() {
        let input = InputIndex::new(2).unwrap();
        assert_eq!(
            Command::InputGain(input, 3).token(),
            "SETTINGS=INPUT,INPUT=2,GAIN=+3"
        );
        assert_eq!(
            Command::InputGain(input, -4).token(),
            "SETTINGS=INPUT,INPUT=2,GAIN=-4"
        );
        assert_eq!(Command::Eq(EqBand::Low, 0).token(), "SETTINGS=OUTPUT,EQLOW=0");
        assert_eq!(Command::EqQuery(EqBand::High).token(), "SETTINGS=OUTPUT,EQHIGH=?");
    }

    #[test]
    fn switches_render_device_words() {
        assert_eq!(Command::Power(true).token(), "POWER=ON");
        assert_eq!(Command::MixMute(false).token(), "MIXMUTE=OFF");
        assert_eq!(Command::MixMode(true).token(), "SETTINGS=INPUT,INPUT=1,MIX=TRUE");
    }
}
