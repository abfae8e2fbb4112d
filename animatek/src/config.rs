use anyhow::{Context, Result};
use animatek_ipc::{Rgb, SOCKET_PATH, WS_ADDR};
use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::devices::QueueSettings;

/// Animatek - practice session timer daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "animatek")]
#[command(about = "Practice session timer with real-time observers and smart lights")]
pub struct Args {
    /// Path to animatek.toml (defaults to the platform config dir)
    #[arg(long, env = "ANIMATEK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Govee developer API key; lights are disabled without it
    #[arg(long, env = "GOVEE_API_KEY", hide_env_values = true)]
    pub govee_api_key: Option<String>,

    /// Google Sheets spreadsheet id for the session ledger
    #[arg(long, env = "SHEET_ID")]
    pub sheet_id: Option<String>,

    #[arg(long, env = "GOOGLE_SHEETS_ID", hide = true)]
    pub google_sheets_id: Option<String>,
}

impl Args {
    pub fn sheet_id(&self) -> Option<String> {
        self.sheet_id.clone().or_else(|| self.google_sheets_id.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub ws_listen: SocketAddr,
    pub control_socket: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub sessions_out_dir: Option<PathBuf>,
    pub notify_on_complete: bool,
    pub lights: LightsConfig,
    pub google: GoogleConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LightsConfig {
    pub api_base: String,
    pub min_gap_ms: u64,
    pub max_retries: u32,
    pub fallback_wait_secs: u64,
    pub blink_on_complete: bool,
    pub category_lights: bool,
    /// Light that follows the category color
    pub category_device: String,
    pub devices: BTreeMap<String, DeviceConfig>,
    pub presets: BTreeMap<String, PresetConfig>,
    pub category_colors: BTreeMap<String, Rgb>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeviceConfig {
    pub device: String,
    pub model: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PresetConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<PresetStep>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PresetStep {
    On { device: String },
    Off { device: String },
    Color { device: String, r: u8, g: u8, b: u8 },
    Brightness { device: String, percent: u8 },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub sheet_id: Option<String>,
    pub calendar_id: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_listen: WS_ADDR.parse().unwrap_or_else(|_| ([127, 0, 0, 1], 8765).into()),
            control_socket: PathBuf::from(SOCKET_PATH),
            data_dir: None,
            sessions_out_dir: None,
            notify_on_complete: false,
            lights: LightsConfig::default(),
            google: GoogleConfig::default(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            sheet_id: None,
            calendar_id: "primary".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for LightsConfig {
    fn default() -> Self {
        let devices = BTreeMap::from([
            (
                "estudio".to_string(),
                DeviceConfig {
                    device: "DA:1C:DD:6E:84:C6:55:6A".to_string(),
                    model: "H6047".to_string(),
                    name: "Estudio".to_string(),
                },
            ),
            (
                "salon".to_string(),
                DeviceConfig {
                    device: "53:5E:D3:36:36:37:37:06".to_string(),
                    model: "H6046".to_string(),
                    name: "Salon TV".to_string(),
                },
            ),
        ]);

        let category_colors = BTreeMap::from([
            ("VCV Rack".to_string(), Rgb::new(0, 128, 0)),
            ("Bitwig".to_string(), Rgb::new(255, 165, 0)),
            ("Octatrack".to_string(), Rgb::new(0, 100, 255)),
        ]);

        Self {
            api_base: "https://developer-api.govee.com/v1".to_string(),
            min_gap_ms: 6200,
            max_retries: 2,
            fallback_wait_secs: 30,
            blink_on_complete: true,
            category_lights: false,
            category_device: "estudio".to_string(),
            devices,
            presets: default_presets(),
            category_colors,
        }
    }
}

fn default_presets() -> BTreeMap<String, PresetConfig> {
    use PresetStep::*;
    let on = |d: &str| On { device: d.to_string() };
    let off = |d: &str| Off { device: d.to_string() };
    let color = |d: &str, r, g, b| Color { device: d.to_string(), r, g, b };
    let dim = |d: &str, percent| Brightness { device: d.to_string(), percent };

    BTreeMap::from([
        (
            "focus".to_string(),
            PresetConfig {
                name: "Focus (90min)".to_string(),
                description: "Estudio light blue 50%, salon off".to_string(),
                steps: vec![
                    on("estudio"),
                    color("estudio", 173, 216, 230),
                    dim("estudio", 50),
                    off("salon"),
                ],
            },
        ),
        (
            "streaming".to_string(),
            PresetConfig {
                name: "Streaming".to_string(),
                description: "Estudio white 100%, salon green 10%".to_string(),
                steps: vec![
                    on("estudio"),
                    color("estudio", 255, 255, 255),
                    dim("estudio", 100),
                    on("salon"),
                    color("salon", 0, 128, 0),
                    dim("salon", 10),
                ],
            },
        ),
        (
            "movie".to_string(),
            PresetConfig {
                name: "Movie".to_string(),
                description: "Salon blue 5%, estudio off".to_string(),
                steps: vec![
                    on("salon"),
                    color("salon", 0, 0, 255),
                    dim("salon", 5),
                    off("estudio"),
                ],
            },
        ),
        (
            "romantic".to_string(),
            PresetConfig {
                name: "Romantic".to_string(),
                description: "Everything crimson 20%".to_string(),
                steps: vec![
                    on("estudio"),
                    color("estudio", 220, 20, 60),
                    dim("estudio", 20),
                    on("salon"),
                    color("salon", 220, 20, 60),
                    dim("salon", 20),
                ],
            },
        ),
    ])
}

impl LightsConfig {
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            min_gap: Duration::from_millis(self.min_gap_ms),
            max_retries: self.max_retries,
            fallback_wait: Duration::from_secs(self.fallback_wait_secs),
        }
    }
}

impl Config {
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let proj_dirs = ProjectDirs::from("net", "animatek", "animatek")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn sessions_out_dir(&self) -> Result<PathBuf> {
        match &self.sessions_out_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.data_dir()?.join("sessions")),
        }
    }
}

pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match ProjectDirs::from("net", "animatek", "animatek") {
            Some(proj_dirs) => proj_dirs.config_dir().join("animatek.toml"),
            None => return Ok(Config::default()),
        },
    };
    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("Config file {:?} does not exist", path);
        }
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at {:?}", path))?;
    parse_config(&config_str).with_context(|| format!("Failed to parse config file at {:?}", path))
}

pub fn parse_config(raw: &str) -> Result<Config> {
    Ok(toml::from_str(raw)?)
}
