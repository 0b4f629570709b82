//! Configuration system for the Tessera display server
//!
//! Loads configuration from TOML file at `~/.config/tessera/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub compositor: CompositorConfig,
    pub input: InputConfig,
    pub server: ServerConfig,
    pub screensaver: ScreensaverConfig,
    pub sound: SoundConfig,
}

impl Config {
    /// Load configuration from the default location, or use defaults if the
    /// file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `config_path`, generating it when missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("tessera");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Frame buffer geometry and device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Linear 32bpp frame buffer device; `None` renders to memory only
    pub framebuffer: Option<PathBuf>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            framebuffer: Some(PathBuf::from("/dev/fb0")),
        }
    }
}

/// Compositor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Desktop background as 0xAARRGGBB
    pub background: u32,
    /// Draw the pointer in software over composited pixels
    pub software_cursor: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            background: 0xff20_3040,
            software_cursor: true,
        }
    }
}

/// Input device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// evdev pointer devices, e.g. `/dev/input/event2`
    pub pointer_devices: Vec<PathBuf>,
    /// evdev keyboard devices
    pub keyboard_devices: Vec<PathBuf>,
    /// Multiplier applied to relative pointer motion
    pub pointer_speed: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            pointer_devices: Vec::new(),
            keyboard_devices: Vec::new(),
            pointer_speed: 1.0,
        }
    }
}

/// Client connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Overrides `$XDG_RUNTIME_DIR/tessera.sock`
    pub socket: Option<PathBuf>,
    /// Ids granted to every client as it connects
    pub initial_ids: u32,
    /// Upper bound on ids granted by one `Create`
    pub max_ids_per_request: u32,
    /// Total window ids the server will ever hand out
    pub id_limit: u32,
    /// Largest accepted frame payload in bytes
    pub max_payload: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            initial_ids: 8,
            max_ids_per_request: 64,
            id_limit: 1 << 20,
            max_payload: tessera_proto::DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Idle blanking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreensaverConfig {
    pub enabled: bool,
    /// Successive idle timeouts in milliseconds; the last one blanks the screen
    pub timeouts_ms: Vec<u64>,
}

impl Default for ScreensaverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeouts_ms: vec![300_000, 600_000],
        }
    }
}

/// Sound configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// External player invoked with the file as its only argument
    pub player: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [display]
            width = 320
            height = 240

            [screensaver]
            timeouts_ms = [1000]
            "#,
        )
        .unwrap();
        assert_eq!(config.display.width, 320);
        assert_eq!(config.display.framebuffer, Some(PathBuf::from("/dev/fb0")));
        assert_eq!(config.screensaver.timeouts_ms, vec![1000]);
        assert_eq!(config.server.initial_ids, 8);
    }

    #[test]
    fn missing_file_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.display.width, 1024);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.compositor.background, config.compositor.background);
    }
}
