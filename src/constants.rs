// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video encoder bitrate presets
///
/// These presets define the target bitrate for video encoding based on resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Get bitrate in kbps for an output width
    ///
    /// - SD (640 wide): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280 wide): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920 wide): Low=4, Medium=8, High=16 Mbps
    /// - 2K (2560 wide): Low=8, Medium=16, High=32 Mbps
    /// - 4K (3840 wide): Low=15, Medium=30, High=50 Mbps
    pub fn bitrate_kbps(&self, width: u32) -> u32 {
        let (low, medium, high) = match get_resolution_tier(width) {
            ResolutionTier::SD => (1_000, 2_000, 4_000),
            ResolutionTier::HD => (2_500, 5_000, 10_000),
            ResolutionTier::FullHD => (4_000, 8_000, 16_000),
            ResolutionTier::TwoK => (8_000, 16_000, 32_000),
            ResolutionTier::FourK => (15_000, 30_000, 50_000),
        };

        match self {
            BitratePreset::Low => low,
            BitratePreset::Medium => medium,
            BitratePreset::High => high,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// SD: 640x480 and below
    SD,
    /// HD: 1280x720
    HD,
    /// Full HD: 1920x1080
    FullHD,
    /// 2K: 2560x1440
    TwoK,
    /// 4K: 3840x2160 and above
    FourK,
}

/// Get the resolution tier for a given width
pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 2560 => ResolutionTier::TwoK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format bitrate for display (e.g., "8 Mbps" or "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// What the movie sink does when the writer reports it cannot take more data
///
/// `FinishStream` marks the stream finished for the rest of the session,
/// `Pause` skips the pull and waits for the writer's next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackpressurePolicy {
    #[default]
    FinishStream,
    Pause,
}

impl BackpressurePolicy {
    pub const ALL: [BackpressurePolicy; 2] =
        [BackpressurePolicy::FinishStream, BackpressurePolicy::Pause];

    pub fn display_name(&self) -> &'static str {
        match self {
            BackpressurePolicy::FinishStream => "finish-stream",
            BackpressurePolicy::Pause => "pause",
        }
    }
}

/// GPU adapter preference when creating the execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DevicePreference {
    #[default]
    LowPower,
    HighPerformance,
}

/// Frame graph constants
pub mod graph {
    /// Compute threadgroup edge in pixels (8x8x1)
    pub const TILE_SIZE: u32 = 8;

    /// Bytes per pixel of the fixed RGBA8 pixel format
    pub const BYTES_PER_PIXEL: u32 = 4;

    /// Number of indices drawn for the full-screen quad
    pub const QUAD_INDEX_COUNT: u32 = 6;

    /// Clear colour used when a render pass draws nothing (opaque black)
    pub const CLEAR_COLOR: [f64; 4] = [0.0, 0.0, 0.0, 1.0];

    /// Drawables kept by an offscreen surface
    pub const OFFSCREEN_DRAWABLES: usize = 2;
}

/// Movie recording constants
pub mod recording {
    /// Default number of CPU pixel buffers available to the movie sink
    pub const DEFAULT_POOL_SIZE: usize = 8;

    /// Default output size
    pub const DEFAULT_WIDTH: u32 = 1280;
    pub const DEFAULT_HEIGHT: u32 = 720;

    /// Default framerate advertised to the encoder
    pub const DEFAULT_FRAMERATE: u32 = 30;

    /// Upper bound of queued input bytes per appsrc before the writer
    /// reports itself not ready (about 4 RGBA 1080p frames)
    pub const APPSRC_MAX_BYTES: u64 = 4 * 1920 * 1080 * 4;

    /// File name prefix for recordings
    pub const FILE_PREFIX: &str = "recording";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// How often a writer pump checks whether its appsrc has room
    pub const PUMP_INTERVAL: Duration = Duration::from_millis(2);

    /// Bus poll timeout for the writer's message loop
    pub const BUS_POLL_MS: u64 = 100;

    /// Maximum time to wait for EOS when finalizing a file
    pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Preroll wait when opening a movie file
    pub const PREROLL_TIMEOUT: Duration = Duration::from_secs(5);

    /// Appsink pull timeout for decoded movie frames
    pub const DECODE_PULL_MS: u64 = 100;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_tiers() {
        assert_eq!(get_resolution_tier(3840), ResolutionTier::FourK);
        assert_eq!(get_resolution_tier(1920), ResolutionTier::FullHD);
        assert_eq!(get_resolution_tier(1280), ResolutionTier::HD);
        assert_eq!(get_resolution_tier(320), ResolutionTier::SD);
    }

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(8_000), "8 Mbps");
        assert_eq!(format_bitrate(2_500), "2.5 Mbps");
    }
}
