// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults, so a missing file or a partial file
// both produce a usable configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub assets: AssetConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Size of the per-frame synchronization ring. 1 means fully serial frames.
    pub frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Asset paths, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub model: PathBuf,
    pub texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/chalet.obj"),
            texture: PathBuf::from("textures/chalet.jpg"),
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults if it is missing or broken.
    ///
    /// Runs before the logger exists, so the failure is handed back for the
    /// caller to report instead of being logged here.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if config.graphics.frames_in_flight == 0 {
            log::warn!("graphics.frames_in_flight must be at least 1, using 1");
            config.graphics.frames_in_flight = 1;
        }
        Ok(config)
    }

    /// Preferred present mode as Vulkan enum. The swapchain falls back to
    /// FIFO when the surface doesn't offer it.
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}
