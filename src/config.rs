//! Renderer settings loaded from a JSON file.
//!
//! Every field is optional in the file; missing ones take the defaults
//! below. The default file lives at `<config_dir>/yuv_presenter/config.json`.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

const CONFIG_DIR_NAME: &str = "yuv_presenter";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type ConfigResult<T = ()> = std::result::Result<T, ConfigError>;

/// Surface presentation mode, mapped onto `wgpu::PresentMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    #[default]
    AutoVsync,
    AutoNoVsync,
    Fifo,
    Immediate,
    Mailbox,
}

impl From<PresentMode> for wgpu::PresentMode {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentMode::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
            PresentMode::Fifo => wgpu::PresentMode::Fifo,
            PresentMode::Immediate => wgpu::PresentMode::Immediate,
            PresentMode::Mailbox => wgpu::PresentMode::Mailbox,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(preference: PowerPreference) -> Self {
        match preference {
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

/// Settings for the presentation surface and renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Color behind the video, RGBA in 0.0..=1.0. Transparent black by default.
    pub clear_color: [f64; 4],

    pub present_mode: PresentMode,

    pub power_preference: PowerPreference,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 0.0],
            present_mode: PresentMode::default(),
            power_preference: PowerPreference::default(),
        }
    }
}

impl RendererConfig {
    /// Reads and parses the config file at `path`.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `explicit` if given, else the default file if it exists, else
    /// the built-in defaults.
    ///
    /// Errors from an explicit path are returned. A broken default file is
    /// logged and ignored.
    pub fn load_or_default(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            log::info!("RendererConfig::load_or_default: loading {}", path.display());
            return Self::load(path);
        }

        let Some(path) = default_path().filter(|path| path.exists()) else {
            log::debug!("RendererConfig::load_or_default: using defaults");
            return Ok(Self::default());
        };

        match Self::load(&path) {
            Ok(config) => {
                log::info!("RendererConfig::load_or_default: loaded {}", path.display());
                Ok(config)
            }
            Err(e) => {
                log::warn!("RendererConfig::load_or_default: {e}, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}

/// `<config_dir>/yuv_presenter/config.json`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(CONFIG_DIR_NAME);
        path.push(CONFIG_FILE_NAME);
        path
    })
}
