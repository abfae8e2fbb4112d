use animatek_ipc::{DeviceStatus, Rgb};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Device, DeviceApi, DeviceError, QueuedCommand};

/// Govee developer API (v1) over HTTPS
pub struct GoveeApi {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoveeApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, DeviceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    async fn control(&self, key: &str, device: &Device, cmd: Value) -> Result<Value, DeviceError> {
        let response = self
            .http
            .put(format!("{}/devices/control", self.base_url))
            .header("Govee-API-Key", key)
            .json(&json!({ "device": device.id, "model": device.model, "cmd": cmd }))
            .send()
            .await?;
        read_reply(response).await
    }

    async fn state(&self, key: &str, device: &Device) -> Result<Value, DeviceError> {
        let response = self
            .http
            .get(format!("{}/devices/state", self.base_url))
            .header("Govee-API-Key", key)
            .query(&[("device", device.id.as_str()), ("model", device.model.as_str())])
            .send()
            .await?;
        read_reply(response).await
    }
}

async fn read_reply(response: reqwest::Response) -> Result<Value, DeviceError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body = response.text().await.unwrap_or_default();
        return Err(DeviceError::Throttled { body });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DeviceError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await.unwrap_or(Value::Null))
}

#[async_trait]
impl DeviceApi for GoveeApi {
    async fn dispatch(&self, command: &QueuedCommand) -> Result<Value, DeviceError> {
        let key = self.api_key.as_deref().ok_or(DeviceError::NotConfigured)?;
        match command.operation.to_cmd() {
            Some(cmd) => self.control(key, &command.target, cmd).await,
            None => self.state(key, &command.target).await,
        }
    }
}

/// Turn a `/devices/state` reply into a [`DeviceStatus`]
pub fn parse_state(device: &Device, reply: &Value) -> DeviceStatus {
    let props = reply["data"]["properties"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let power = props
        .iter()
        .find_map(|p| p.get("powerState").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();
    let brightness = props
        .iter()
        .find_map(|p| p.get("brightness").and_then(Value::as_u64))
        .map(|b| b.min(100) as u8);
    let color = props
        .iter()
        .find_map(|p| p.get("color"))
        .and_then(|c| serde_json::from_value::<Rgb>(c.clone()).ok());

    DeviceStatus {
        key: device.key.clone(),
        name: device.name.clone(),
        power,
        brightness,
        color,
    }
}
