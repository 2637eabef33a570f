// SPDX-License-Identifier: GPL-3.0-only

//! Generated colour bars and sine tone
//!
//! Seven 75% bars scroll one column per frame so dropped and repeated
//! frames are visible in a recording.

use super::capture::{CaptureHandle, CapturedFrame};
use crate::graph::{LoopAction, TickLoop, Timestamp};
use crate::media::{AudioFormat, AudioSample, SampleFormat};
use std::time::Duration;
use tracing::debug;

const BARS: [[u8; 3]; 7] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
];

const TONE_AMPLITUDE: f64 = 0.25;

/// Colour bar and tone generator
#[derive(Debug, Clone)]
pub struct TestPattern {
    width: u32,
    height: u32,
    fps: u32,
    tone_hz: Option<f32>,
    audio_format: AudioFormat,
    audio_frames_sent: u64,
    audio_chunks: u64,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps: fps.max(1),
            tone_hz: None,
            audio_format: AudioFormat::default(),
            audio_frames_sent: 0,
            audio_chunks: 0,
        }
    }

    /// Also produce a sine tone at `frequency` Hz
    pub fn with_tone(mut self, frequency: f32, format: AudioFormat) -> Self {
        self.tone_hz = Some(frequency);
        self.audio_format = format;
        self
    }

    pub fn has_tone(&self) -> bool {
        self.tone_hz.is_some()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps as u64)
    }

    /// Frame `index` of the pattern
    pub fn frame(&self, index: u64) -> CapturedFrame {
        let (width, height) = (self.width, self.height);
        let bar_width = (width / 7).max(1);
        let shift = index % width as u64;
        let mut data = vec![0u8; width as usize * height as usize * 4];

        for (y, row) in data.chunks_exact_mut(width as usize * 4).enumerate() {
            // Bottom quarter is a grey ramp
            let ramp = y as u32 >= height - height / 4;
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                let column = (x as u64 + shift) % width as u64;
                let rgb = if ramp {
                    let level = (column * 255 / (width as u64 - 1).max(1)).min(255) as u8;
                    [level; 3]
                } else {
                    BARS[((column as u32 / bar_width) as usize).min(6)]
                };
                pixel[..3].copy_from_slice(&rgb);
                pixel[3] = 255;
            }
        }

        CapturedFrame::rgba(width, height, data, Timestamp::from_frame(index, self.fps))
    }

    /// Tone covering the next frame interval, `None` without a tone
    pub fn next_audio(&mut self) -> Option<AudioSample> {
        let frequency = self.tone_hz? as f64;
        let format = self.audio_format;
        let rate = format.sample_rate.max(1) as u64;
        let start = self.audio_frames_sent;
        self.audio_chunks += 1;
        let end = self.audio_chunks * rate / self.fps as u64;
        let count = end.saturating_sub(start).max(1);

        let channels = format.channels.max(1) as usize;
        let mut data = Vec::with_capacity(count as usize * format.bytes_per_frame() as usize);
        for n in start..start + count {
            let phase = 2.0 * std::f64::consts::PI * frequency * n as f64 / rate as f64;
            let value = phase.sin() * TONE_AMPLITUDE;
            for _ in 0..channels {
                match format.sample_format {
                    SampleFormat::S16Le => {
                        data.extend_from_slice(&((value * i16::MAX as f64) as i16).to_le_bytes())
                    }
                    SampleFormat::F32Le => data.extend_from_slice(&(value as f32).to_le_bytes()),
                }
            }
        }

        self.audio_frames_sent = start + count;
        let time = Timestamp::from_nanos(start * 1_000_000_000 / rate);
        Some(AudioSample::new(data, time, format))
    }

    /// Send frames (and tone) to `handle` at the pattern's frame rate
    ///
    /// Stops after `frames` frames when given, or when the source is gone.
    pub fn spawn(mut self, handle: CaptureHandle, frames: Option<u64>) -> TickLoop {
        let interval = self.frame_interval();
        let mut index = 0u64;
        TickLoop::start("test-pattern", Some(interval), move || {
            if frames.is_some_and(|limit| index >= limit) {
                if self.has_tone() {
                    handle.finish_audio();
                }
                debug!(frames = index, "Test pattern finished");
                return LoopAction::Stop;
            }
            if let Some(sample) = self.next_audio() {
                handle.send_audio(sample);
            }
            if !handle.send_frame(self.frame(index)) {
                return LoopAction::Stop;
            }
            index += 1;
            LoopAction::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry_and_time() {
        let pattern = TestPattern::new(14, 8, 30);
        let frame = pattern.frame(30);
        assert_eq!(frame.data.len(), 14 * 8 * 4);
        assert_eq!(frame.time, Timestamp::from_millis(1000));
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_first_bar_is_white() {
        let pattern = TestPattern::new(14, 8, 30);
        let frame = pattern.frame(0);
        assert_eq!(&frame.data[..4], &[191, 191, 191, 255]);
    }

    #[test]
    fn test_tone_is_contiguous() {
        let mut pattern = TestPattern::new(8, 8, 30).with_tone(440.0, AudioFormat::default());
        let first = pattern.next_audio().unwrap();
        let second = pattern.next_audio().unwrap();
        assert_eq!(first.time, Timestamp::ZERO);
        assert_eq!(first.frames(), 1600);
        assert_eq!(second.time, Timestamp::ZERO.saturating_add(first.duration()));
    }

    #[test]
    fn test_silent_without_tone() {
        let mut pattern = TestPattern::new(8, 8, 30);
        assert!(pattern.next_audio().is_none());
    }
}
