// SPDX-License-Identifier: MPL-2.0

//! Video encoder selection with hardware acceleration priority
//!
//! Encoders are tried in a fixed priority order: hardware AV1, HEVC and
//! H.264 first, then software fallbacks. A codec preference narrows the
//! search to one codec. Bitrate comes from the configured preset and the
//! output width.

use crate::constants::BitratePreset;
use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Video codec types in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// AV1 codec (best compression, modern)
    AV1,
    /// HEVC/H.265 codec (good compression)
    HEVC,
    /// H.264 codec (best compatibility)
    H264,
}

impl VideoCodec {
    /// Container the codec is written to when the configured one cannot hold it
    pub fn native_container(&self) -> ContainerFormat {
        match self {
            VideoCodec::AV1 => ContainerFormat::WebM,
            VideoCodec::HEVC | VideoCodec::H264 => ContainerFormat::MP4,
        }
    }

    pub fn parser_name(&self) -> &'static str {
        match self {
            VideoCodec::AV1 => "av1parse",
            VideoCodec::HEVC => "h265parse",
            VideoCodec::H264 => "h264parse",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "av1" => Some(VideoCodec::AV1),
            "hevc" | "h265" => Some(VideoCodec::HEVC),
            "h264" | "avc" => Some(VideoCodec::H264),
            _ => None,
        }
    }
}

/// Container formats for recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContainerFormat {
    #[default]
    MP4,
    Matroska,
    WebM,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::MP4 => "mp4",
            ContainerFormat::Matroska => "mkv",
            ContainerFormat::WebM => "webm",
        }
    }

    pub fn muxer_name(&self) -> &'static str {
        match self {
            ContainerFormat::MP4 => "mp4mux",
            ContainerFormat::Matroska => "matroskamux",
            ContainerFormat::WebM => "webmmux",
        }
    }

    pub fn supports(&self, codec: VideoCodec) -> bool {
        match self {
            ContainerFormat::MP4 | ContainerFormat::Matroska => true,
            ContainerFormat::WebM => codec == VideoCodec::AV1,
        }
    }

    /// `self` if it can hold `codec`, otherwise the codec's native container
    pub fn for_codec(&self, codec: VideoCodec) -> ContainerFormat {
        if self.supports(codec) {
            *self
        } else {
            codec.native_container()
        }
    }
}

/// Information about an available encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// GStreamer element name
    pub element_name: String,
    /// Display name for listings
    pub display_name: String,
    pub codec: VideoCodec,
    pub is_hardware: bool,
    /// Priority (lower = higher priority)
    pub priority: u32,
}

/// Selected video encoder with its parser
pub struct SelectedVideoEncoder {
    pub encoder: gst::Element,
    pub parser: Option<gst::Element>,
    pub info: EncoderInfo,
}

/// Every encoder the pipeline knows how to configure, in priority order
const ENCODER_SPECS: &[(&str, &str, VideoCodec, bool, u32)] = &[
    // Hardware AV1
    ("vaav1enc", "VA-API AV1 (HW)", VideoCodec::AV1, true, 1),
    ("nvav1enc", "NVIDIA AV1 (HW)", VideoCodec::AV1, true, 2),
    ("qsvav1enc", "Intel QSV AV1 (HW)", VideoCodec::AV1, true, 3),
    ("amfav1enc", "AMD AMF AV1 (HW)", VideoCodec::AV1, true, 4),
    // Software AV1
    ("svtav1enc", "SVT-AV1 (SW)", VideoCodec::AV1, false, 10),
    ("av1enc", "AOM AV1 (SW)", VideoCodec::AV1, false, 11),
    // Hardware HEVC/H.265
    ("vah265enc", "VA-API H.265 (HW)", VideoCodec::HEVC, true, 20),
    ("vaapih265enc", "VA-API H.265 (HW)", VideoCodec::HEVC, true, 21),
    ("nvh265enc", "NVIDIA H.265 (HW)", VideoCodec::HEVC, true, 22),
    ("qsvh265enc", "Intel QSV H.265 (HW)", VideoCodec::HEVC, true, 23),
    ("amfh265enc", "AMD AMF H.265 (HW)", VideoCodec::HEVC, true, 24),
    ("v4l2h265enc", "V4L2 H.265 (HW)", VideoCodec::HEVC, true, 25),
    // Software HEVC/H.265
    ("x265enc", "x265 H.265 (SW)", VideoCodec::HEVC, false, 30),
    // Hardware H.264
    ("vah264enc", "VA-API H.264 (HW)", VideoCodec::H264, true, 40),
    ("vaapih264enc", "VA-API H.264 (HW)", VideoCodec::H264, true, 41),
    ("nvh264enc", "NVIDIA H.264 (HW)", VideoCodec::H264, true, 42),
    ("qsvh264enc", "Intel QSV H.264 (HW)", VideoCodec::H264, true, 43),
    ("amfh264enc", "AMD AMF H.264 (HW)", VideoCodec::H264, true, 44),
    ("v4l2h264enc", "V4L2 H.264 (HW)", VideoCodec::H264, true, 45),
    // Software H.264
    ("x264enc", "x264 H.264 (SW)", VideoCodec::H264, false, 50),
    ("openh264enc", "OpenH264 H.264 (SW)", VideoCodec::H264, false, 51),
];

/// Enumerate the available video encoders, sorted by priority
pub fn enumerate_video_encoders() -> Vec<EncoderInfo> {
    if gst::init().is_err() {
        return Vec::new();
    }

    let mut available: Vec<EncoderInfo> = ENCODER_SPECS
        .iter()
        .filter(|(element_name, ..)| gst::ElementFactory::find(element_name).is_some())
        .map(
            |(element_name, display_name, codec, is_hardware, priority)| EncoderInfo {
                element_name: element_name.to_string(),
                display_name: display_name.to_string(),
                codec: *codec,
                is_hardware: *is_hardware,
                priority: *priority,
            },
        )
        .collect();

    available.sort_by_key(|e| e.priority);
    available
}

/// Select the best available video encoder
///
/// With a `preference`, only encoders of that codec are considered.
pub fn select_video_encoder(
    preference: Option<VideoCodec>,
    preset: BitratePreset,
    width: u32,
) -> Result<SelectedVideoEncoder, RecordingError> {
    gst::init().map_err(|e| RecordingError::PipelineError(format!("GStreamer init: {}", e)))?;

    for info in enumerate_video_encoders() {
        if preference.is_some_and(|codec| codec != info.codec) {
            continue;
        }
        match create_encoder_from_info(&info, preset, width) {
            Ok(selected) => {
                info!(
                    encoder = %info.element_name,
                    codec = ?info.codec,
                    hardware = info.is_hardware,
                    "Selected video encoder"
                );
                return Ok(selected);
            }
            Err(e) => {
                // Factory present but element unusable (e.g. no device); try the next one
                warn!(encoder = %info.element_name, error = %e, "Video encoder unusable");
            }
        }
    }

    Err(RecordingError::EncoderNotAvailable(match preference {
        Some(codec) => format!("no usable {:?} encoder", codec),
        None => "no video encoder available; install x264enc or openh264enc".to_string(),
    }))
}

/// Build and configure the encoder described by `info`
pub fn create_encoder_from_info(
    info: &EncoderInfo,
    preset: BitratePreset,
    width: u32,
) -> Result<SelectedVideoEncoder, RecordingError> {
    let encoder = gst::ElementFactory::make(&info.element_name)
        .build()
        .map_err(|e| {
            RecordingError::EncoderNotAvailable(format!("{}: {}", info.element_name, e))
        })?;

    configure_video_encoder(&encoder, &info.element_name, preset, preset.bitrate_kbps(width));

    let parser_name = info.codec.parser_name();
    let parser = match gst::ElementFactory::make(parser_name).build() {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(parser = parser_name, error = %e, "Parser unavailable, linking encoder directly");
            None
        }
    };

    Ok(SelectedVideoEncoder {
        encoder,
        parser,
        info: info.clone(),
    })
}

/// Software encoder speed preset for a bitrate preset
fn speed_preset(preset: BitratePreset) -> &'static str {
    match preset {
        BitratePreset::Low => "veryfast",
        BitratePreset::Medium => "fast",
        BitratePreset::High => "medium",
    }
}

fn configure_video_encoder(
    encoder: &gst::Element,
    encoder_name: &str,
    preset: BitratePreset,
    bitrate: u32,
) {
    match encoder_name {
        "x264enc" | "x265enc" => {
            encoder.set_property_from_str("speed-preset", speed_preset(preset));
            if encoder_name == "x264enc" {
                encoder.set_property_from_str("tune", "zerolatency");
            }
            encoder.set_property("bitrate", bitrate);
        }
        "vaapih264enc" | "vaapih265enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate);
        }
        "vah264enc" | "vah265enc" | "vaav1enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate);
        }
        "nvh264enc" | "nvh265enc" | "nvav1enc" => {
            encoder.set_property("bitrate", bitrate);
            encoder.set_property_from_str("rc-mode", "vbr");
        }
        "amfh264enc" | "amfh265enc" | "amfav1enc" => {
            encoder.set_property("bitrate", bitrate);
            encoder.set_property_from_str("rate-control", "cbr");
        }
        "qsvh264enc" | "qsvh265enc" | "qsvav1enc" => {
            encoder.set_property("bitrate", bitrate);
        }
        "openh264enc" => {
            encoder.set_property_from_str("rate-control", "bitrate");
            // Bits per second
            encoder.set_property("bitrate", bitrate * 1000);
            encoder.set_property_from_str("usage-type", "camera");
        }
        "svtav1enc" => {
            encoder.set_property("target-bitrate", bitrate);
        }
        "av1enc" => {
            encoder.set_property("target-bitrate", bitrate);
            encoder.set_property("cpu-used", 5i32);
        }
        _ => {
            debug!(encoder = encoder_name, "Using default encoder configuration");
            return;
        }
    }
    debug!(encoder = encoder_name, bitrate_kbps = bitrate, "Configured video encoder");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_for_codec() {
        assert_eq!(
            ContainerFormat::MP4.for_codec(VideoCodec::H264),
            ContainerFormat::MP4
        );
        assert_eq!(
            ContainerFormat::WebM.for_codec(VideoCodec::H264),
            ContainerFormat::MP4
        );
        assert_eq!(
            ContainerFormat::WebM.for_codec(VideoCodec::AV1),
            ContainerFormat::WebM
        );
    }

    #[test]
    fn test_container_formats() {
        assert_eq!(ContainerFormat::MP4.extension(), "mp4");
        assert_eq!(ContainerFormat::Matroska.muxer_name(), "matroskamux");
        assert_eq!(ContainerFormat::WebM.muxer_name(), "webmmux");
    }

    #[test]
    fn test_specs_sorted_by_priority() {
        let priorities: Vec<u32> = ENCODER_SPECS.iter().map(|s| s.4).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(VideoCodec::parse("h265"), Some(VideoCodec::HEVC));
    }
}
