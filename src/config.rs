// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::recording::{DEFAULT_FRAMERATE, DEFAULT_HEIGHT, DEFAULT_POOL_SIZE, DEFAULT_WIDTH};
use crate::constants::{BackpressurePolicy, BitratePreset, DevicePreference};
use crate::errors::{AppError, AppResult};
use crate::filters::FillMode;
use crate::media::AudioFormat;
use crate::media::encoders::{ContainerFormat, VideoCodec};
use crate::pipelines::video::{GstWriterSettings, MovieSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name under the user config dir
pub const CONFIG_DIR_NAME: &str = "frame-pipeline";
const CONFIG_FILE_NAME: &str = "config.json";

/// Default folder name for saved recordings
const DEFAULT_SAVE_FOLDER: &str = "Recordings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Movie width in pixels
    pub width: u32,
    /// Movie height in pixels
    pub height: u32,
    pub framerate: u32,
    /// How frames of another aspect ratio are placed in the movie
    pub fill_mode: FillMode,
    /// What the movie sink does when the encoder falls behind
    pub backpressure: BackpressurePolicy,
    /// Video encoder bitrate preset (Low, Medium, High)
    pub bitrate_preset: BitratePreset,
    /// Restrict encoder selection to one codec
    pub codec_preference: Option<VideoCodec>,
    pub container: ContainerFormat,
    /// Record an audio track when the source has one
    pub audio_enabled: bool,
    pub audio_format: AudioFormat,
    /// CPU frames that may wait for the encoder at once
    pub pool_size: usize,
    pub gpu_preference: DevicePreference,
    /// Where recordings go; `None` for the user's video folder
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
            fill_mode: FillMode::AspectFit,
            backpressure: BackpressurePolicy::FinishStream,
            bitrate_preset: BitratePreset::Medium,
            codec_preference: None,
            container: ContainerFormat::MP4,
            audio_enabled: true,
            audio_format: AudioFormat::default(),
            pool_size: DEFAULT_POOL_SIZE,
            gpu_preference: DevicePreference::LowPower,
            output_dir: None,
        }
    }
}

impl Config {
    /// `<config dir>/frame-pipeline/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn save(&self) -> AppResult<()> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Config("No config directory".to_string()))?;
        self.save_to(&path)
    }

    /// Write pretty JSON to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Directory recordings are written to
    pub fn recordings_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            dirs::video_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
                .join(DEFAULT_SAVE_FOLDER)
        })
    }

    pub fn movie_settings(&self) -> MovieSettings {
        MovieSettings {
            width: self.width,
            height: self.height,
            fill_mode: self.fill_mode,
            backpressure: self.backpressure,
            pool_size: self.pool_size,
        }
    }

    pub fn writer_settings(&self) -> GstWriterSettings {
        GstWriterSettings {
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            codec_preference: self.codec_preference,
            container: self.container,
            bitrate_preset: self.bitrate_preset,
            audio_format: self.audio_format,
        }
    }
}
