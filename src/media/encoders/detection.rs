// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder detection

use super::audio::audio_encoder_names;
use super::video::{EncoderInfo, enumerate_video_encoders};
use gstreamer as gst;
use tracing::{debug, info};

/// Check if a specific GStreamer element is available
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().is_ok() && gst::ElementFactory::find(element_name).is_some()
}

/// Available audio encoder element names, in selection order
pub fn detect_audio_encoders() -> Vec<String> {
    let available: Vec<String> = audio_encoder_names()
        .filter(|name| is_element_available(name))
        .map(str::to_string)
        .collect();
    for name in &available {
        debug!(encoder = %name, "Audio encoder available");
    }
    available
}

/// Every encoder the recorder could use on this machine
#[derive(Debug, Clone, Default)]
pub struct EncoderReport {
    pub video: Vec<EncoderInfo>,
    pub audio: Vec<String>,
}

pub fn detect_encoders() -> EncoderReport {
    let report = EncoderReport {
        video: enumerate_video_encoders(),
        audio: detect_audio_encoders(),
    };
    info!(
        video = report.video.len(),
        audio = report.audio.len(),
        "Detected encoders"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_runs() {
        // Only checks detection does not panic without plugins
        let report = detect_encoders();
        assert!(report.audio.len() <= 4);
    }
}
