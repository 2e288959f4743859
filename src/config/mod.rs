use crate::global;
use crate::window::{WindowAnchor, WindowDuration};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub summary: SummaryConfig,
    pub service: ServiceConfig,
    pub media: MediaConfig,
    pub archive: ArchiveConfig,
    pub parser: ParserConfig,
}

/// Per-run summarization options. CLI flags and API requests override these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// 0.0 = brief, 1.0 = detailed
    pub verbosity: f32,
    pub window: WindowDuration,
    pub anchor: WindowAnchor,
    pub include_media: bool,
    pub max_media_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub provider: String,
    pub model: Option<String>,
    pub api_endpoint: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Longest edge allowed for a transmitted raster
    pub max_dimension: u32,
    /// Largest encoded payload allowed per medium, before base64
    pub max_bytes: u64,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub max_total_bytes: u64,
    pub max_entries: usize,
    pub extraction_timeout_seconds: u64,
    /// Parent directory for scoped extraction; system temp dir when unset
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// How many message-start lines decide the timestamp format
    pub format_sample_lines: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            verbosity: 0.3,
            window: WindowDuration::All,
            anchor: WindowAnchor::LastMessage,
            include_media: true,
            max_media_count: 15,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            api_endpoint: None,
            timeout_seconds: 120,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1568,
            max_bytes: 4 * 1024 * 1024,
            ffmpeg_path: None,
            ffprobe_path: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 2 * 1024 * 1024 * 1024,
            max_entries: 20_000,
            extraction_timeout_seconds: 300,
            work_dir: None,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            format_sample_lines: 20,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
