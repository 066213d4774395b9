//! JSON message protocol for client transports.
//!
//! Clients send `{"action": "...", ...}` objects that parse into [`Action`]; the bridge
//! answers with [`ServerMessage`]s tagged by `type`.

use crate::action::{Action, Reply};
use crate::connection::ConnectionStatus;
use crate::error::{BridgeError, Result};
use crate::notifier::BridgeEvent;
use crate::state::DeviceState;
use crate::types::{db_label, INPUT_COUNT};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Device state as sent to clients: stored fields plus derived display values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    #[serde(flatten)]
    pub state: DeviceState,
    pub volume_percent: u8,
    pub mix_volume_percent: u8,
    pub input_gain_percent: [u8; INPUT_COUNT],
    pub volume_label: String,
    pub mix_volume_label: String,
    pub input_gain_labels: [String; INPUT_COUNT],
    pub eq_low_label: String,
    pub eq_mid_label: String,
    pub eq_high_label: String,
}

impl From<&DeviceState> for StateView {
    fn from(state: &DeviceState) -> Self {
        Self {
            volume_percent: state.volume_percent(),
            mix_volume_percent: state.mix_volume_percent(),
            input_gain_percent: state.input_gain_percent(),
            volume_label: db_label(state.volume_db),
            mix_volume_label: db_label(state.mix_volume_db),
            input_gain_labels: state.input_gain_db.map(db_label),
            eq_low_label: db_label(state.eq_low_db),
            eq_mid_label: db_label(state.eq_mid_db),
            eq_high_label: db_label(state.eq_high_db),
            state: state.clone(),
        }
    }
}

/// Message from the bridge to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StateUpdate {
        state: StateView,
        /// RFC 3339, e.g. `2024-05-01T12:00:00.123Z`
        timestamp: DateTime<Utc>,
    },
    ConnectionStatus(ConnectionStatus),
    DeviceError {
        record: String,
    },
    ReconnectExhausted {
        attempts: u32,
    },
    Pong,
    Ack,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn state_update(state: &DeviceState) -> Self {
        ServerMessage::StateUpdate {
            state: StateView::from(state),
            timestamp: Utc::now(),
        }
    }

    pub fn from_event(event: &BridgeEvent) -> Self {
        match event {
            BridgeEvent::State(state) => Self::state_update(state),
            BridgeEvent::DeviceError(record) => ServerMessage::DeviceError {
                record: record.clone(),
            },
            BridgeEvent::ReconnectExhausted { attempts } => ServerMessage::ReconnectExhausted {
                attempts: *attempts,
            },
        }
    }

    pub fn from_reply(reply: &Reply) -> Self {
        match reply {
            Reply::Accepted => ServerMessage::Ack,
            Reply::State(state) => Self::state_update(state),
            Reply::ConnectionStatus(status) => ServerMessage::ConnectionStatus(status.clone()),
            Reply::Pong => ServerMessage::Pong,
        }
    }

    pub fn from_error(error: &BridgeError) -> Self {
        ServerMessage::Error {
            message: error.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse one client message
pub fn parse_action(text: &str) -> Result<Action> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HoldControl;
    use crate::connection::LinkState;
    use crate::types::{Direction, EqBand};
    use serde_json::{json, Value};

    #[test]
    fn parses_client_actions() {
        assert_eq!(
            parse_action(r#"{"action":"volume_set","value":-20}"#).unwrap(),
            Action::VolumeSet { value: -20 }
        );
        assert_eq!(
            parse_action(r#"{"action":"eq_adjust","band":"high","direction":"down"}"#).unwrap(),
            Action::EqAdjust {
                band: EqBand::High,
                direction: Direction::Down
            }
        );
        assert_eq!(
            parse_action(r#"{"action":"hold_start","control":"volume_up"}"#).unwrap(),
            Action::HoldStart {
                control: HoldControl::VolumeUp,
                input: None
            }
        );
        assert_eq!(
            parse_action(r#"{"action":"hold_stop","control":"input_gain_down","input":3}"#)
                .unwrap(),
            Action::HoldStop {
                control: HoldControl::InputGainDown,
                input: Some(3)
            }
        );
    }

    #[test]
    fn unknown_action_is_a_json_error() {
        let err = parse_action(r#"{"action":"self_destruct"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Json(_)));
        assert!(parse_action("not json").is_err());
    }

    #[test]
    fn state_update_carries_derived_values() {
        let mut state = DeviceState::default();
        state.volume_db = -20;
        state.input_gain_db[1] = 3;
        state.eq_low_db = -2;

        let json: Value =
            serde_json::from_str(&ServerMessage::state_update(&state).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "state_update");
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok(), "{}", timestamp);
        assert!(timestamp.ends_with('Z'));

        let view = &json["state"];
        assert_eq!(view["volumeDb"], -20);
        assert_eq!(view["volumePercent"], 61);
        assert_eq!(view["volumeLabel"], "-20dB");
        assert_eq!(view["inputGainDb"], json!([0, 3, 0, 0]));
        assert_eq!(view["inputGainPercent"], json!([50, 63, 50, 50]));
        assert_eq!(view["inputGainLabels"], json!(["0dB", "+3dB", "0dB", "0dB"]));
        assert_eq!(view["eqLowLabel"], "-2dB");
        assert_eq!(view["mixModeEnabled"], false);
    }

    #[test]
    fn events_and_replies_map_to_messages() {
        let exhausted =
            ServerMessage::from_event(&BridgeEvent::ReconnectExhausted { attempts: 10 });
        assert_eq!(
            serde_json::to_value(&exhausted).unwrap(),
            json!({"type": "reconnect_exhausted", "attempts": 10})
        );

        assert_eq!(
            serde_json::to_value(ServerMessage::from_reply(&Reply::Accepted)).unwrap(),
            json!({"type": "ack"})
        );

        let status = ConnectionStatus {
            connected: false,
            state: LinkState::Connecting,
            manually_disconnected: false,
            reconnect_attempts: 2,
            reconnect_exhausted: false,
            host: "10.0.0.5".to_string(),
            port: 5000,
        };
        let reply = ServerMessage::from_reply(&Reply::ConnectionStatus(status));
        let json = serde_json::to_value(reply).unwrap();
        assert_eq!(json["type"], "connection_status");
        assert_eq!(json["state"], "connecting");
        assert_eq!(json["reconnectAttempts"], 2);

        let error = ServerMessage::from_error(&BridgeError::NotConnected);
        assert_eq!(
            serde_json::to_value(error).unwrap(),
            json!({"type": "error", "message": "Not connected to NEETS amp"})
        );
    }
}
