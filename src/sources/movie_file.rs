// SPDX-License-Identifier: GPL-3.0-only

//! Movie file source
//!
//! Decodes a file with GStreamer and feeds a [`CaptureHandle`]:
//!
//! ```text
//! filesrc ! decodebin ! queue ! videoconvert ! video/x-raw,format=RGBA ! appsink
//! filesrc ! decodebin ! queue ! audioconvert ! audioresample ! audio/x-raw,... ! appsink
//! ```
//!
//! Video and audio run as separate pipelines so a file without an audio
//! track still plays. Timestamps are buffer PTS; when looping, every pass
//! continues from the end of the previous one.

use super::capture::{CaptureHandle, CapturedFrame};
use crate::constants::timing::{BUS_POLL_MS, DECODE_PULL_MS, PREROLL_TIMEOUT};
use crate::errors::SourceError;
use crate::graph::{LoopAction, TickLoop, Timestamp};
use crate::media::{AudioFormat, AudioSample};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How decoded media is paced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Decode without clock sync
    AsFastAsPossible,
    /// Play at the file's own rate
    #[default]
    ActualSpeed,
    /// Play at the file's own rate and restart at the end
    ActualSpeedLooping,
}

impl PlaybackMode {
    pub const ALL: [PlaybackMode; 3] = [
        PlaybackMode::AsFastAsPossible,
        PlaybackMode::ActualSpeed,
        PlaybackMode::ActualSpeedLooping,
    ];

    fn syncs(&self) -> bool {
        !matches!(self, PlaybackMode::AsFastAsPossible)
    }

    pub fn loops(&self) -> bool {
        matches!(self, PlaybackMode::ActualSpeedLooping)
    }
}

/// A decoding movie file; dropping it stops playback
pub struct MovieFileSource {
    video_pipeline: gst::Pipeline,
    audio_pipeline: Option<gst::Pipeline>,
    workers: Vec<TickLoop>,
    width: u32,
    height: u32,
    mode: PlaybackMode,
}

fn decode_error(context: &str) -> impl FnOnce(gst::glib::BoolError) -> SourceError + '_ {
    move |e| SourceError::Decode(format!("{}: {}", context, e))
}

/// Parse a launch line and point its `src` filesrc at `path`
fn launch(description: &str, path: &Path) -> Result<gst::Pipeline, SourceError> {
    let pipeline = gst::parse::launch(description)
        .map_err(|e| SourceError::Decode(format!("Failed to create pipeline: {}", e)))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| SourceError::Decode("Failed to downcast to Pipeline".to_string()))?;

    let src = pipeline
        .by_name("src")
        .ok_or_else(|| SourceError::Decode("Failed to find filesrc".to_string()))?;
    src.set_property("location", path.to_string_lossy().as_ref());
    Ok(pipeline)
}

fn appsink(pipeline: &gst::Pipeline, name: &str) -> Result<gst_app::AppSink, SourceError> {
    pipeline
        .by_name(name)
        .ok_or_else(|| SourceError::Decode(format!("Failed to find {}", name)))?
        .downcast::<gst_app::AppSink>()
        .map_err(|_| SourceError::Decode("Failed to downcast to AppSink".to_string()))
}

fn configure_appsink(sink: &gst_app::AppSink, mode: PlaybackMode) {
    sink.set_property("sync", mode.syncs());
    if mode.syncs() {
        sink.set_max_buffers(1);
        sink.set_drop(true);
    } else {
        // Block the decoder instead of dropping when the graph is slower
        sink.set_max_buffers(2);
        sink.set_drop(false);
    }
}

/// Pause the pipeline and wait until it has prerolled
fn preroll(pipeline: &gst::Pipeline) -> Result<(), SourceError> {
    pipeline
        .set_state(gst::State::Paused)
        .map_err(|e| SourceError::Decode(format!("Failed to pause pipeline: {:?}", e)))?;

    let bus = pipeline
        .bus()
        .ok_or_else(|| SourceError::Decode("No bus on pipeline".to_string()))?;
    let deadline = Instant::now() + PREROLL_TIMEOUT;

    while Instant::now() < deadline {
        if let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL_MS)) {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    return Err(SourceError::Decode(format!(
                        "Pipeline error: {}",
                        err.error()
                    )));
                }
                gst::MessageView::AsyncDone(_) => return Ok(()),
                _ => {}
            }
        }
    }
    Err(SourceError::Decode("Timeout waiting for preroll".to_string()))
}

fn buffer_time(buffer: &gst::BufferRef, offset: u64) -> Timestamp {
    let pts = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
    Timestamp::from_nanos(offset.saturating_add(pts))
}

fn frame_from_sample(sample: &gst::Sample, offset: u64) -> Result<CapturedFrame, SourceError> {
    let caps = sample
        .caps()
        .ok_or_else(|| SourceError::InvalidFrame("No caps on sample".to_string()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| SourceError::InvalidFrame(format!("Unreadable video caps: {}", e)))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| SourceError::InvalidFrame("No buffer in sample".to_string()))?;
    let map = buffer
        .map_readable()
        .map_err(|_| SourceError::InvalidFrame("Failed to map buffer".to_string()))?;

    let bytes_per_row = info
        .stride()
        .first()
        .map(|&s| s as u32)
        .unwrap_or(info.width() * 4);

    Ok(CapturedFrame {
        width: info.width(),
        height: info.height(),
        bytes_per_row,
        data: map.as_slice().to_vec(),
        time: buffer_time(buffer, offset),
    })
}

fn audio_from_sample(
    sample: &gst::Sample,
    offset: u64,
    format: AudioFormat,
) -> Result<AudioSample, SourceError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| SourceError::InvalidFrame("No buffer in audio sample".to_string()))?;
    let map = buffer
        .map_readable()
        .map_err(|_| SourceError::InvalidFrame("Failed to map audio buffer".to_string()))?;
    Ok(AudioSample::new(
        map.as_slice().to_vec(),
        buffer_time(buffer, offset),
        format,
    ))
}

/// Restart a pipeline from the beginning
fn rewind(pipeline: &gst::Pipeline) {
    if let Err(e) = pipeline.seek_simple(
        gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
        gst::ClockTime::ZERO,
    ) {
        warn!(?e, "Seek to start failed");
    }
}

impl MovieFileSource {
    /// Open `path` and start sending its frames to `handle`
    ///
    /// With `with_audio` set, the audio track is converted to that format
    /// and sent as well. A file without an audio track plays video only.
    pub fn open(
        path: &Path,
        mode: PlaybackMode,
        handle: CaptureHandle,
        with_audio: Option<AudioFormat>,
    ) -> Result<Self, SourceError> {
        info!(path = %path.display(), ?mode, "Opening movie file");
        gst::init().map_err(|e| SourceError::Decode(format!("GStreamer init failed: {}", e)))?;

        let video_pipeline = launch(
            "filesrc name=src ! decodebin ! queue ! videoconvert ! \
             video/x-raw,format=RGBA ! appsink name=videosink",
            path,
        )?;
        let video_sink = appsink(&video_pipeline, "videosink")?;
        configure_appsink(&video_sink, mode);

        if let Err(e) = preroll(&video_pipeline) {
            let _ = video_pipeline.set_state(gst::State::Null);
            return Err(e);
        }

        let info = video_sink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok());
        let Some(info) = info else {
            let _ = video_pipeline.set_state(gst::State::Null);
            return Err(SourceError::Decode(
                "Failed to determine video dimensions".to_string(),
            ));
        };
        let (width, height) = (info.width(), info.height());

        let audio = match with_audio {
            Some(format) => Self::open_audio(path, mode, format),
            None => None,
        };

        video_pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| SourceError::Decode(format!("Failed to start video: {:?}", e)))?;

        let mut workers = vec![Self::spawn_video_loop(
            video_pipeline.clone(),
            video_sink,
            mode,
            handle.clone(),
        )];

        let audio_pipeline = match audio {
            Some((pipeline, sink, format)) => match pipeline.set_state(gst::State::Playing) {
                Ok(_) => {
                    workers.push(Self::spawn_audio_loop(
                        pipeline.clone(),
                        sink,
                        mode,
                        format,
                        handle,
                    ));
                    Some(pipeline)
                }
                Err(e) => {
                    warn!(?e, "Failed to start audio, playing video only");
                    let _ = pipeline.set_state(gst::State::Null);
                    None
                }
            },
            None => None,
        };

        info!(width, height, has_audio = audio_pipeline.is_some(), "Movie file opened");

        Ok(Self {
            video_pipeline,
            audio_pipeline,
            workers,
            width,
            height,
            mode,
        })
    }

    fn open_audio(
        path: &Path,
        mode: PlaybackMode,
        format: AudioFormat,
    ) -> Option<(gst::Pipeline, gst_app::AppSink, AudioFormat)> {
        let description = format!(
            "filesrc name=src ! decodebin ! queue ! audioconvert ! audioresample ! \
             audio/x-raw,format={},layout=interleaved,rate={},channels={} ! \
             appsink name=audiosink",
            format.sample_format.caps_name(),
            format.sample_rate,
            format.channels
        );

        let opened = launch(&description, path).and_then(|pipeline| {
            let sink = appsink(&pipeline, "audiosink")?;
            sink.set_property("sync", mode.syncs());
            if let Err(e) = preroll(&pipeline) {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
            Ok((pipeline, sink))
        });

        match opened {
            Ok((pipeline, sink)) => Some((pipeline, sink, format)),
            Err(e) => {
                debug!(error = %e, "No usable audio track");
                None
            }
        }
    }

    fn spawn_video_loop(
        pipeline: gst::Pipeline,
        sink: gst_app::AppSink,
        mode: PlaybackMode,
        handle: CaptureHandle,
    ) -> TickLoop {
        let mut offset = 0u64;
        let mut pass_end = 0u64;
        TickLoop::start("movie-video", None, move || {
            if let Some(sample) = sink.try_pull_sample(gst::ClockTime::from_mseconds(DECODE_PULL_MS))
            {
                match frame_from_sample(&sample, offset) {
                    Ok(frame) => {
                        let duration = sample
                            .buffer()
                            .and_then(|b| b.duration())
                            .map(|d| d.nseconds())
                            .unwrap_or(0);
                        pass_end = pass_end.max(frame.time.as_nanos() + duration);
                        if !handle.send_frame(frame) {
                            return LoopAction::Stop;
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping undecodable frame"),
                }
                return LoopAction::Continue;
            }

            if sink.is_eos() {
                if mode.loops() {
                    debug!(offset_ns = pass_end, "Movie looped");
                    offset = pass_end;
                    rewind(&pipeline);
                } else {
                    info!("Movie video finished");
                    return LoopAction::Stop;
                }
            }
            LoopAction::Continue
        })
    }

    fn spawn_audio_loop(
        pipeline: gst::Pipeline,
        sink: gst_app::AppSink,
        mode: PlaybackMode,
        format: AudioFormat,
        handle: CaptureHandle,
    ) -> TickLoop {
        let mut offset = 0u64;
        let mut pass_end = 0u64;
        TickLoop::start("movie-audio", None, move || {
            if let Some(sample) = sink.try_pull_sample(gst::ClockTime::from_mseconds(DECODE_PULL_MS))
            {
                match audio_from_sample(&sample, offset, format) {
                    Ok(audio) => {
                        let end = audio.time.saturating_add(audio.duration());
                        pass_end = pass_end.max(end.as_nanos());
                        if !handle.send_audio(audio) {
                            return LoopAction::Stop;
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping undecodable audio"),
                }
                return LoopAction::Continue;
            }

            if sink.is_eos() {
                if mode.loops() {
                    offset = pass_end;
                    rewind(&pipeline);
                } else {
                    info!("Movie audio finished");
                    handle.finish_audio();
                    return LoopAction::Stop;
                }
            }
            LoopAction::Continue
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_audio(&self) -> bool {
        self.audio_pipeline.is_some()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// Total duration in seconds, when known
    pub fn duration(&self) -> Option<f64> {
        self.video_pipeline
            .query_duration::<gst::ClockTime>()
            .map(|d| d.seconds_f64())
    }

    /// True while any decode loop is running
    pub fn is_playing(&self) -> bool {
        self.workers.iter().any(TickLoop::is_running)
    }

    /// Jump both streams to `position_secs`
    pub fn seek(&self, position_secs: f64) -> Result<(), SourceError> {
        let position = gst::ClockTime::from_nseconds((position_secs.max(0.0) * 1e9) as u64);
        self.video_pipeline
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, position)
            .map_err(decode_error("Video seek failed"))?;
        if let Some(audio) = &self.audio_pipeline {
            audio
                .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, position)
                .map_err(decode_error("Audio seek failed"))?;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        let _ = self.video_pipeline.set_state(gst::State::Null);
        if let Some(audio) = &self.audio_pipeline {
            let _ = audio.set_state(gst::State::Null);
        }
        for worker in &mut self.workers {
            worker.stop();
        }
        self.workers.clear();
        info!("Movie file stopped");
    }
}

impl Drop for MovieFileSource {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_modes() {
        assert_eq!(PlaybackMode::default(), PlaybackMode::ActualSpeed);
        assert!(!PlaybackMode::AsFastAsPossible.syncs());
        assert!(PlaybackMode::ActualSpeedLooping.loops());
        assert!(!PlaybackMode::ActualSpeed.loops());
    }

    #[test]
    fn test_pts_offset() {
        gst::init().unwrap();
        let mut buffer = gst::Buffer::new();
        {
            let buffer = buffer.get_mut().unwrap();
            buffer.set_pts(gst::ClockTime::from_mseconds(40));
        }
        let time = buffer_time(&buffer, 1_000_000_000);
        assert_eq!(time, Timestamp::from_millis(1040));
    }
}
