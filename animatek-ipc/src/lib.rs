//! Wire types shared by the animatek daemon, its observers and animatekctl
//!
//! Two channels exist:
//!
//! - the real-time bus: single-line JSON text frames over WebSocket
//!   ([`ServerMessage`] out, [`ClientMessage`] in)
//! - the control plane: one newline-terminated JSON [`Request`] over a Unix
//!   domain socket, answered by one JSON [`Response`]

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod messages;
mod records;
mod timer;

pub use messages::{ClientMessage, ServerMessage};
pub use records::{AppConfig, CalendarRegistration, CategoryTotals, SessionPatch, SessionRecord};
pub use timer::{TimerAction, TimerPhase, TimerSnapshot};

/// Requests that animatekctl (or any local collaborator) can send to animatek
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Status,
    Timer(TimerAction),
    GetConfig,
    /// JSON object merged key-by-key into the current configuration
    UpdateConfig(serde_json::Value),
    ListSessions,
    DeleteSession { id: i64 },
    ClearSessions,
    PatchSession { id: i64, patch: SessionPatch },
    Stats,
    ImportFromSheet,
    Lights(LightRequest),
}

/// Device control requests, all executed through the rate-limited queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LightRequest {
    AllOn,
    AllOff,
    Power { device: String, on: bool },
    Color { device: String, color: String },
    Brightness { device: String, percent: u8 },
    Preset { name: String },
    Blink,
    Status,
}

/// Responses from animatek back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    State(TimerSnapshot),
    Config(AppConfig),
    Sessions(Vec<SessionRecord>),
    Session(SessionRecord),
    Removed(usize),
    Stats(CategoryTotals),
    Imported(usize),
    Devices(Vec<DeviceStatus>),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Live state of one light as reported by the vendor API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub key: String,
    pub name: String,
    pub power: String,
    pub brightness: Option<u8>,
    pub color: Option<Rgb>,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is animatek running?")]
    ConnectionRefused,
}

pub const SOCKET_PATH: &str = "/tmp/animatek.sock";

pub const WS_ADDR: &str = "127.0.0.1:8765";
