// src/settings.rs
//
// Application settings stored as TOML in the user config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::display_log::{DisplayTimezone, IdFormat, RenderOptions};
use crate::ingest::IngestConfig;
use crate::io::{BusConfig, FrameFormat};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    /// SocketCAN interface name, or "virtual" for the in-process demo bus
    #[serde(default = "default_interface")]
    pub interface: String,
    /// If set, the interface is reconfigured with this bitrate (needs pkexec)
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub frame_format: FrameFormat, // "standard" | "extended"
    #[serde(default)]
    pub display_frame_id_format: IdFormat, // "hex" | "decimal"
    #[serde(default)]
    pub display_timezone: DisplayTimezone, // "local" | "utc"
    #[serde(default = "default_yield_interval_ms")]
    pub yield_interval_ms: u64,
    #[serde(default = "default_reader_capacity")]
    pub reader_capacity: usize,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_interface() -> String {
    "can0".to_string()
}
fn default_yield_interval_ms() -> u64 {
    100
}
fn default_reader_capacity() -> usize {
    4096
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            bitrate: None,
            frame_format: FrameFormat::default(),
            display_frame_id_format: IdFormat::default(),
            display_timezone: DisplayTimezone::default(),
            yield_interval_ms: default_yield_interval_ms(),
            reader_capacity: default_reader_capacity(),
            log_dir: None,
        }
    }
}

impl AppSettings {
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            interface: self.interface.clone(),
            bitrate: self.bitrate,
            format: self.frame_format,
            capacity: self.reader_capacity,
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            yield_interval: Duration::from_millis(self.yield_interval_ms),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            id_format: self.display_frame_id_format,
            timezone: self.display_timezone,
        }
    }
}

/// Default settings file: `<config dir>/canterm/settings.toml`.
pub fn settings_path() -> Result<PathBuf, String> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| "Failed to get config dir".to_string())?;
    Ok(config_dir.join("canterm").join("settings.toml"))
}

/// Load settings, falling back to defaults when the file does not exist.
pub fn load_settings(path: &Path) -> Result<AppSettings, String> {
    if !path.exists() {
        tlog!("[settings] {} not found, using defaults", path.display());
        return Ok(AppSettings::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings: {}", e))?;

    toml::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config dir: {}", e))?;
    }

    let content = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}
