use animatek_ipc::{DeviceStatus, Rgb};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::govee::parse_state;
use super::{CommandQueue, Device, DeviceError, Operation};
use crate::config::{LightsConfig, PresetConfig, PresetStep};

/// Named colors understood by `set_color`, Spanish first with English aliases
const COLORS: &[(&str, Rgb)] = &[
    ("rojo", Rgb::new(255, 0, 0)),
    ("azul", Rgb::new(0, 0, 255)),
    ("verde", Rgb::new(0, 255, 0)),
    ("blanco", Rgb::new(255, 255, 255)),
    ("amarillo", Rgb::new(255, 255, 0)),
    ("naranja", Rgb::new(255, 165, 0)),
    ("morado", Rgb::new(128, 0, 255)),
    ("violeta", Rgb::new(128, 0, 255)),
    ("rosa", Rgb::new(255, 105, 180)),
    ("cyan", Rgb::new(0, 255, 255)),
    ("turquesa", Rgb::new(0, 255, 255)),
    ("carmesi", Rgb::new(220, 20, 60)),
    ("calido", Rgb::new(255, 200, 100)),
    ("frio", Rgb::new(180, 220, 255)),
    ("red", Rgb::new(255, 0, 0)),
    ("blue", Rgb::new(0, 0, 255)),
    ("green", Rgb::new(0, 255, 0)),
    ("white", Rgb::new(255, 255, 255)),
    ("yellow", Rgb::new(255, 255, 0)),
    ("orange", Rgb::new(255, 165, 0)),
    ("purple", Rgb::new(128, 0, 255)),
    ("pink", Rgb::new(255, 105, 180)),
    ("warm", Rgb::new(255, 200, 100)),
    ("cold", Rgb::new(180, 220, 255)),
];

pub fn named_color(name: &str) -> Option<Rgb> {
    let name = name.trim().to_lowercase();
    COLORS.iter().find(|(n, _)| *n == name).map(|(_, rgb)| *rgb)
}

/// The configured lights plus everything that can be done to them
///
/// Multi-step operations await each queued command in turn. They are not
/// atomic: a failing step returns its error with the earlier steps applied.
pub struct Fleet {
    queue: CommandQueue,
    devices: BTreeMap<String, Device>,
    presets: BTreeMap<String, PresetConfig>,
    category_colors: BTreeMap<String, Rgb>,
    category_device: String,
}

impl Fleet {
    pub fn new(queue: CommandQueue, config: &LightsConfig) -> Self {
        let devices = config
            .devices
            .iter()
            .map(|(key, dev)| (key.clone(), Device::from_config(key, dev)))
            .collect();
        Self {
            queue,
            devices,
            presets: config.presets.clone(),
            category_colors: config.category_colors.clone(),
            category_device: config.category_device.clone(),
        }
    }

    fn device(&self, key: &str) -> Result<&Device, DeviceError> {
        self.devices
            .get(key)
            .ok_or_else(|| DeviceError::UnknownDevice(key.to_string()))
    }

    async fn send(&self, key: &str, operation: Operation) -> Result<(), DeviceError> {
        let device = self.device(key)?.clone();
        self.queue.enqueue(device, operation).await?;
        Ok(())
    }

    pub async fn set_power(&self, key: &str, on: bool) -> Result<(), DeviceError> {
        self.send(key, Operation::Power(on)).await
    }

    pub async fn set_rgb(&self, key: &str, rgb: Rgb) -> Result<(), DeviceError> {
        self.send(key, Operation::Color(rgb)).await
    }

    /// Turn the light on, then paint it with a named color
    pub async fn set_color(&self, key: &str, color: &str) -> Result<(), DeviceError> {
        self.device(key)?;
        let rgb = named_color(color).ok_or_else(|| DeviceError::UnknownColor(color.to_string()))?;
        self.set_power(key, true).await?;
        self.set_rgb(key, rgb).await
    }

    pub async fn set_brightness(&self, key: &str, percent: u8) -> Result<(), DeviceError> {
        self.send(key, Operation::Brightness(percent.min(100))).await
    }

    pub async fn all_on(&self) -> Result<(), DeviceError> {
        for key in self.devices.keys() {
            self.set_power(key, true).await?;
        }
        Ok(())
    }

    pub async fn all_off(&self) -> Result<(), DeviceError> {
        for key in self.devices.keys() {
            self.set_power(key, false).await?;
        }
        Ok(())
    }

    /// Two off/on cycles over every light
    pub async fn blink(&self) -> Result<(), DeviceError> {
        for _ in 0..2 {
            self.all_off().await?;
            self.all_on().await?;
        }
        Ok(())
    }

    pub async fn apply_preset(&self, name: &str) -> Result<(), DeviceError> {
        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| DeviceError::UnknownPreset(name.to_string()))?;
        info!("Applying light preset {} ({} steps)", preset.name, preset.steps.len());
        for step in &preset.steps {
            match step {
                PresetStep::On { device } => self.set_power(device, true).await?,
                PresetStep::Off { device } => self.set_power(device, false).await?,
                PresetStep::Color { device, r, g, b } => {
                    self.set_rgb(device, Rgb::new(*r, *g, *b)).await?
                }
                PresetStep::Brightness { device, percent } => {
                    self.set_brightness(device, *percent).await?
                }
            }
        }
        Ok(())
    }

    /// Returns `false` when the category has no color assigned
    pub async fn apply_category_color(&self, category: &str) -> Result<bool, DeviceError> {
        let Some(rgb) = self.category_colors.get(category).copied() else {
            return Ok(false);
        };
        let key = self.category_device.clone();
        self.set_power(&key, true).await?;
        self.set_rgb(&key, rgb).await?;
        self.set_brightness(&key, 50).await?;
        Ok(true)
    }

    /// Live status of every light; unreachable lights report `unknown`
    pub async fn status(&self) -> Result<Vec<DeviceStatus>, DeviceError> {
        let mut statuses = Vec::with_capacity(self.devices.len());
        for device in self.devices.values() {
            match self.queue.enqueue(device.clone(), Operation::Status).await {
                Ok(reply) => statuses.push(parse_state(device, &reply)),
                Err(DeviceError::NotConfigured) => return Err(DeviceError::NotConfigured),
                Err(e) => {
                    warn!("Status query for {} failed: {}", device.key, e);
                    statuses.push(DeviceStatus {
                        key: device.key.clone(),
                        name: device.name.clone(),
                        power: "unknown".to_string(),
                        brightness: None,
                        color: None,
                    });
                }
            }
        }
        Ok(statuses)
    }
}
