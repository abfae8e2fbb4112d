use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    #[default]
    Idle,
    Running,
    Paused,
}

/// Full timer state, sent on every change so observers never need diffs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: TimerPhase,
    pub duration_sec: u64,
    pub remaining_sec: u64,
    pub category: String,
    pub session_name: String,
    pub language: String,
    pub session_type: String,
    #[serde(rename = "startedAtISO")]
    pub started_at: Option<DateTime<Utc>>,
}

/// A mutation request for the timer engine
///
/// Payloads have already been coerced; anything that could not be coerced
/// never becomes an action (see [`TimerAction::from_wire`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerAction {
    Start,
    Pause,
    Resume,
    Reset,
    Finish,
    /// Signed adjustment of the remaining seconds
    Add(i64),
    SetCategory(String),
    SetSessionName(String),
    SetDurationSec(i64),
    SetLanguage(String),
    SetSessionType(String),
}

impl TimerAction {
    /// Build an action from the `action`/`payload` pair of a `command` frame.
    ///
    /// Unknown actions and payloads that cannot be coerced return `None`,
    /// which callers treat as "ignore".
    pub fn from_wire(action: &str, payload: &Value) -> Option<Self> {
        match action {
            "start" => Some(Self::Start),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "reset" => Some(Self::Reset),
            "finish" => Some(Self::Finish),
            "add" => Some(Self::Add(coerce_seconds(payload).unwrap_or(0))),
            "setCategory" => coerce_text(payload).map(Self::SetCategory),
            "setSessionName" => coerce_text(payload).map(Self::SetSessionName),
            "setDurationSec" => coerce_seconds(payload).map(Self::SetDurationSec),
            "setLanguage" => coerce_text(payload).map(Self::SetLanguage),
            "setSessionType" => coerce_text(payload).map(Self::SetSessionType),
            _ => None,
        }
    }
}

fn coerce_seconds(payload: &Value) -> Option<i64> {
    let value = match payload {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then(|| value.round() as i64)
}

fn coerce_text(payload: &Value) -> Option<String> {
    match payload {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}
