// SPDX-License-Identifier: MPL-2.0

//! Encoder selection for the movie writer

use crate::constants::BitratePreset;
use crate::errors::RecordingError;
use crate::media::encoders::{
    ContainerFormat, SelectedAudioEncoder, SelectedVideoEncoder, VideoCodec, select_audio_encoder,
    select_video_encoder,
};
use tracing::info;

/// What the writer asks of its encoders
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Restrict the search to one codec
    pub codec_preference: Option<VideoCodec>,
    /// Preferred container; replaced when it cannot hold the selected codec
    pub container: ContainerFormat,
    pub bitrate_preset: BitratePreset,
    /// Output width, for the bitrate tier
    pub width: u32,
    /// Audio channel count, `None` for a video-only movie
    pub audio_channels: Option<u32>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec_preference: None,
            container: ContainerFormat::MP4,
            bitrate_preset: BitratePreset::default(),
            width: 1920,
            audio_channels: None,
        }
    }
}

/// Encoders chosen for one recording
pub struct SelectedEncoders {
    pub video: SelectedVideoEncoder,
    pub audio: Option<SelectedAudioEncoder>,
    pub container: ContainerFormat,
}

/// Select the video encoder, the container it fits in and, when asked, an audio encoder
///
/// A missing audio encoder is an error when audio was requested.
pub fn select_encoders(config: &EncoderConfig) -> Result<SelectedEncoders, RecordingError> {
    let video = select_video_encoder(config.codec_preference, config.bitrate_preset, config.width)?;
    let container = config.container.for_codec(video.info.codec);
    if container != config.container {
        info!(
            requested = ?config.container,
            selected = ?container,
            codec = ?video.info.codec,
            "Container cannot hold codec, switching"
        );
    }

    let audio = match config.audio_channels {
        Some(channels) => Some(select_audio_encoder(container, channels)?),
        None => None,
    };

    Ok(SelectedEncoders {
        video,
        audio,
        container,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EncoderConfig::default();
        assert_eq!(config.container, ContainerFormat::MP4);
        assert_eq!(config.bitrate_preset, BitratePreset::Medium);
        assert!(config.audio_channels.is_none());
    }
}
