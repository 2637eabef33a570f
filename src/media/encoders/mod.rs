// SPDX-License-Identifier: MPL-2.0

//! Media encoder selection and configuration
//!
//! - Hardware encoder priority (AV1 > HEVC > H.264)
//! - Software fallbacks for maximum compatibility
//! - Bitrate from the configured preset and output width

pub mod audio;
pub mod detection;
pub mod video;

pub use audio::{AudioCodec, SelectedAudioEncoder, select_audio_encoder};
pub use detection::{EncoderReport, detect_encoders};
pub use video::{
    ContainerFormat, EncoderInfo, SelectedVideoEncoder, VideoCodec, select_video_encoder,
};
