//! Smart-light control
//!
//! Every outbound device call goes through one [`CommandQueue`]: a single
//! worker draining a FIFO, spacing dispatches by a global minimum gap and
//! retrying throttled calls with backoff. [`Fleet`] composes the queue into
//! the operations callers actually want (presets, named colors, blink).

mod fleet;
mod govee;
mod queue;

pub use fleet::{named_color, Fleet};
pub use govee::GoveeApi;
pub use queue::{CommandQueue, QueueSettings};

use animatek_ipc::Rgb;
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::DeviceConfig;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("GOVEE_API_KEY is not configured")]
    NotConfigured,

    #[error("Unknown device \"{0}\"")]
    UnknownDevice(String),

    #[error("Unknown color \"{0}\"")]
    UnknownColor(String),

    #[error("Unknown preset \"{0}\"")]
    UnknownPreset(String),

    #[error("Rate limited: {body}")]
    Throttled { body: String },

    #[error("Still rate limited after {attempts} attempts: {body}")]
    RetriesExhausted { attempts: u32, body: String },

    #[error("Device API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Command queue closed")]
    QueueClosed,
}

/// A light addressable by the vendor API
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub key: String,
    pub id: String,
    pub model: String,
    pub name: String,
}

impl Device {
    pub fn from_config(key: &str, config: &DeviceConfig) -> Self {
        Self {
            key: key.to_string(),
            id: config.device.clone(),
            model: config.model.clone(),
            name: config.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Power(bool),
    Color(Rgb),
    Brightness(u8),
    Status,
}

impl Operation {
    /// Vendor `cmd` object; `None` for read-only operations
    pub fn to_cmd(&self) -> Option<Value> {
        match self {
            Operation::Power(on) => Some(json!({
                "name": "turn",
                "value": if *on { "on" } else { "off" },
            })),
            Operation::Color(rgb) => Some(json!({ "name": "color", "value": rgb })),
            Operation::Brightness(pct) => Some(json!({ "name": "brightness", "value": pct })),
            Operation::Status => None,
        }
    }
}

/// One command travelling through the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub target: Device,
    pub operation: Operation,
    pub attempt: u32,
}

/// Transport for a single device call
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Perform the call once. Throttling must come back as
    /// [`DeviceError::Throttled`] so the queue can retry it.
    async fn dispatch(&self, command: &QueuedCommand) -> Result<Value, DeviceError>;
}
