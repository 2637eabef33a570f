// SPDX-License-Identifier: GPL-3.0-only

//! Raw audio batches travelling from sources to the movie sink

use crate::graph::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interleaved PCM sample layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    S16Le,
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> u32 {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::F32Le => 4,
        }
    }

    /// Format name in GStreamer raw audio caps
    pub fn caps_name(&self) -> &'static str {
        match self {
            SampleFormat::S16Le => "S16LE",
            SampleFormat::F32Le => "F32LE",
        }
    }

    pub fn from_caps_name(name: &str) -> Option<Self> {
        match name {
            "S16LE" => Some(SampleFormat::S16Le),
            "F32LE" => Some(SampleFormat::F32Le),
            _ => None,
        }
    }
}

/// Sample rate, channel count and sample layout of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_format: SampleFormat,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::S16Le,
        }
    }
}

impl AudioFormat {
    /// Bytes of one sample across all channels
    pub fn bytes_per_frame(&self) -> u32 {
        self.channels.max(1) * self.sample_format.bytes_per_sample()
    }

    /// Playback length of `bytes` of interleaved data
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = bytes as u64 / self.bytes_per_frame() as u64;
        Duration::from_nanos(frames * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }
}

/// One batch of interleaved PCM with the time of its first sample
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub data: Vec<u8>,
    pub time: Timestamp,
    pub format: AudioFormat,
}

impl AudioSample {
    pub fn new(data: Vec<u8>, time: Timestamp, format: AudioFormat) -> Self {
        Self { data, time, format }
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.format.bytes_per_frame() as usize
    }

    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format() {
        let format = AudioFormat::default();
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.sample_format.caps_name(), "S16LE");
    }

    #[test]
    fn test_sample_duration() {
        let format = AudioFormat::default();
        // 480 stereo S16 frames at 48 kHz
        let sample = AudioSample::new(vec![0; 480 * 4], Timestamp::ZERO, format);
        assert_eq!(sample.frames(), 480);
        assert_eq!(sample.duration(), Duration::from_millis(10));
    }
}
