// SPDX-License-Identifier: MPL-2.0

//! Audio encoder selection
//!
//! Priority:
//! 1. Opus (every container the recorder writes can hold it)
//! 2. AAC (MP4 and Matroska only)

use super::video::ContainerFormat;
use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info};

/// Target audio bitrate in bits per second
pub const AUDIO_BITRATE_BPS: i32 = 128_000;

/// Audio codec types in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    AAC,
}

impl AudioCodec {
    pub fn caps_string(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "audio/x-opus",
            AudioCodec::AAC => "audio/mpeg,mpegversion=4",
        }
    }
}

/// Selected audio encoder
pub struct SelectedAudioEncoder {
    pub encoder: gst::Element,
    pub codec: AudioCodec,
    pub element_name: &'static str,
}

const AAC_ENCODERS: [&str; 3] = ["avenc_aac", "faac", "voaacenc"];

/// Audio encoder element names, Opus first
pub fn audio_encoder_names() -> impl Iterator<Item = &'static str> {
    std::iter::once("opusenc").chain(AAC_ENCODERS)
}

/// Select the best audio encoder the container can hold
pub fn select_audio_encoder(
    container: ContainerFormat,
    channels: u32,
) -> Result<SelectedAudioEncoder, RecordingError> {
    gst::init().map_err(|e| RecordingError::PipelineError(format!("GStreamer init: {}", e)))?;

    if let Ok(encoder) = gst::ElementFactory::make("opusenc").build() {
        info!(codec = "Opus", channels, "Selected audio encoder");
        encoder.set_property("bitrate", AUDIO_BITRATE_BPS);
        encoder.set_property_from_str("audio-type", if channels == 1 { "voice" } else { "generic" });
        return Ok(SelectedAudioEncoder {
            encoder,
            codec: AudioCodec::Opus,
            element_name: "opusenc",
        });
    }

    if container != ContainerFormat::WebM {
        for name in AAC_ENCODERS {
            if let Ok(encoder) = gst::ElementFactory::make(name).build() {
                info!(codec = "AAC", encoder = name, channels, "Selected audio encoder");
                configure_aac_encoder(&encoder, name);
                return Ok(SelectedAudioEncoder {
                    encoder,
                    codec: AudioCodec::AAC,
                    element_name: name,
                });
            }
        }
    }

    Err(RecordingError::EncoderNotAvailable(format!(
        "no audio encoder for {:?}; install opusenc",
        container
    )))
}

fn configure_aac_encoder(encoder: &gst::Element, encoder_name: &str) {
    match encoder_name {
        "avenc_aac" => encoder.set_property("bitrate", AUDIO_BITRATE_BPS as i64),
        // faac takes bits per second as an int
        "faac" => encoder.set_property("bitrate", AUDIO_BITRATE_BPS),
        "voaacenc" => encoder.set_property("bitrate", AUDIO_BITRATE_BPS),
        _ => {}
    }
    debug!(encoder = encoder_name, bitrate = AUDIO_BITRATE_BPS, "Configured AAC encoder");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_preferred() {
        assert_eq!(audio_encoder_names().next(), Some("opusenc"));
        assert_eq!(audio_encoder_names().count(), 4);
    }

    #[test]
    fn test_codec_caps() {
        assert_eq!(AudioCodec::Opus.caps_string(), "audio/x-opus");
        assert!(AudioCodec::AAC.caps_string().contains("audio/mpeg"));
    }
}
