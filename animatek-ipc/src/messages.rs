use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::records::{AppConfig, SessionRecord};
use crate::timer::{TimerAction, TimerSnapshot};

/// Frames pushed from the daemon to every observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "state")]
    State(TimerSnapshot),

    #[serde(rename = "session:complete")]
    SessionComplete(SessionRecord),

    #[serde(rename = "config:update")]
    ConfigUpdate(AppConfig),
}

impl ServerMessage {
    /// Single-line JSON, ready to go out as one text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames an observer may send; anything else fails to parse and is ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "command")]
    Command {
        action: String,
        #[serde(default)]
        payload: Value,
    },
}

impl ClientMessage {
    pub fn command(action: impl Into<String>, payload: Value) -> Self {
        Self::Command {
            action: action.into(),
            payload,
        }
    }

    pub fn into_action(self) -> Option<TimerAction> {
        match self {
            Self::Command { action, payload } => TimerAction::from_wire(&action, &payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerPhase;
    use serde_json::json;

    #[test]
    fn test_state_frame_shape() {
        let msg = ServerMessage::State(TimerSnapshot {
            state: TimerPhase::Idle,
            duration_sec: 60,
            remaining_sec: 60,
            category: "General".to_string(),
            session_name: "General".to_string(),
            language: "EN".to_string(),
            session_type: "publica".to_string(),
            started_at: None,
        });
        let json = msg.to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"state","payload":{"#));
        assert!(!json.contains('\n'));
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_config_update_tag() {
        let json = ServerMessage::ConfigUpdate(AppConfig::default()).to_json().unwrap();
        assert!(json.contains(r#""type":"config:update""#));
        assert!(json.contains(r#""defaultDurationMin":90.0"#));
    }

    #[test]
    fn test_client_command_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"command","action":"setDurationSec","payload":1800}"#)
                .unwrap();
        assert_eq!(msg.into_action(), Some(TimerAction::SetDurationSec(1800)));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"command","action":"pause"}"#).unwrap();
        assert_eq!(msg.into_action(), Some(TimerAction::Pause));
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"hello"}"#).is_err());
        assert!(serde_json::from_value::<ClientMessage>(json!({"action": "start"})).is_err());
    }
}
