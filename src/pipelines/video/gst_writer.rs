// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer movie writer
//!
//! Pipeline, built on `start_writing`:
//!
//! ```text
//! appsrc (RGBA) ! queue ! videoconvert ! <encoder> ! <parser> ! <muxer> ! filesink
//! appsrc (PCM)  ! queue ! audioconvert ! audioresample ! <audio encoder> ! <muxer>
//! ```
//!
//! Each registered stream gets a pump thread that calls its data request
//! handler whenever the stream's appsrc has room. A bus thread watches for
//! errors (status becomes `Failed`) and for EOS after `finish_writing`
//! (status becomes `Completed` and the completion handler runs). If EOS
//! does not arrive within the finalize timeout the pipeline is torn down
//! and the handler runs anyway.

use super::encoder_selection::{EncoderConfig, SelectedEncoders, select_encoders};
use super::muxer::{create_muxer, link_muxer_to_sink, link_to_muxer};
use super::writer::{
    CompletionHandler, DataRequestHandler, MovieWriter, StreamKind, WriterStatus,
};
use crate::constants::BitratePreset;
use crate::constants::recording::{APPSRC_MAX_BYTES, DEFAULT_FRAMERATE};
use crate::constants::timing::{BUS_POLL_MS, FINALIZE_TIMEOUT, PUMP_INTERVAL};
use crate::errors::RecordingError;
use crate::graph::{LoopAction, TickLoop, Timestamp};
use crate::handoff_queue::lock_recovering;
use crate::media::encoders::{ContainerFormat, VideoCodec};
use crate::media::{AudioFormat, AudioSample, VideoFrame};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Output format of a [`GstMovieWriter`]
#[derive(Debug, Clone, PartialEq)]
pub struct GstWriterSettings {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub codec_preference: Option<VideoCodec>,
    pub container: ContainerFormat,
    pub bitrate_preset: BitratePreset,
    /// Format of the PCM the audio input receives
    pub audio_format: AudioFormat,
}

impl Default for GstWriterSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: DEFAULT_FRAMERATE,
            codec_preference: None,
            container: ContainerFormat::MP4,
            bitrate_preset: BitratePreset::default(),
            audio_format: AudioFormat::default(),
        }
    }
}

struct Built {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: Option<gst_app::AppSrc>,
}

struct Inner {
    settings: GstWriterSettings,
    output_path: Mutex<PathBuf>,
    status: Mutex<WriterStatus>,
    audio_enabled: AtomicBool,
    built: Mutex<Option<Built>>,
    session_start: Mutex<Option<Timestamp>>,
    video_ended: AtomicBool,
    audio_ended: AtomicBool,
    completion: Mutex<Option<CompletionHandler>>,
    finalize_deadline: Mutex<Option<Instant>>,
    workers: Mutex<Vec<TickLoop>>,
}

impl Inner {
    fn status(&self) -> WriterStatus {
        lock_recovering(&self.status).clone()
    }

    fn set_status(&self, status: WriterStatus) {
        *lock_recovering(&self.status) = status;
    }

    fn ended(&self, stream: StreamKind) -> &AtomicBool {
        match stream {
            StreamKind::Video => &self.video_ended,
            StreamKind::Audio => &self.audio_ended,
        }
    }

    fn appsrc(&self, stream: StreamKind) -> Option<gst_app::AppSrc> {
        let built = lock_recovering(&self.built);
        let built = built.as_ref()?;
        match stream {
            StreamKind::Video => Some(built.video_src.clone()),
            StreamKind::Audio => built.audio_src.clone(),
        }
    }

    fn has_room(&self, stream: StreamKind) -> bool {
        self.appsrc(stream)
            .is_some_and(|src| src.current_level_bytes() < APPSRC_MAX_BYTES)
    }

    /// Presentation time relative to the session start
    fn pts(&self, time: Timestamp) -> Option<gst::ClockTime> {
        let start = (*lock_recovering(&self.session_start))?;
        Some(gst::ClockTime::from_nseconds(
            time.saturating_since(start).as_nanos() as u64,
        ))
    }

    fn end_stream(&self, stream: StreamKind) {
        if self.ended(stream).swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(src) = self.appsrc(stream) {
            if let Err(e) = src.end_of_stream() {
                warn!(%stream, ?e, "Failed to send end of stream");
            }
        }
        debug!(%stream, "Stream ended");
    }

    fn finalize_timed_out(&self) -> bool {
        lock_recovering(&self.finalize_deadline).is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn is_finishing(&self) -> bool {
        lock_recovering(&self.finalize_deadline).is_some()
    }

    /// Tear the pipeline down and run the completion handler (once)
    fn complete(&self) {
        let built = lock_recovering(&self.built).take();
        if let Some(built) = built {
            if let Err(e) = built.pipeline.set_state(gst::State::Null) {
                error!(?e, "Failed to stop recording pipeline");
            }
        }

        {
            let mut status = lock_recovering(&self.status);
            if !status.is_failed() {
                *status = WriterStatus::Completed;
            }
        }

        let path = lock_recovering(&self.output_path).clone();
        info!(path = %path.display(), status = ?self.status(), "Movie finalized");

        let completion = lock_recovering(&self.completion).take();
        if let Some(on_complete) = completion {
            on_complete();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for worker in lock_recovering(&self.workers).drain(..) {
            worker.detach();
        }
        if let Some(built) = lock_recovering(&self.built).take() {
            let _ = built.pipeline.set_state(gst::State::Null);
        }
    }
}

/// [`MovieWriter`] encoding to a file with GStreamer
pub struct GstMovieWriter {
    inner: Arc<Inner>,
}

impl GstMovieWriter {
    /// Writer for `output_path`; the extension is set by the container chosen at start
    pub fn new(output_path: impl Into<PathBuf>, settings: GstWriterSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                output_path: Mutex::new(output_path.into()),
                status: Mutex::new(WriterStatus::Unknown),
                audio_enabled: AtomicBool::new(false),
                built: Mutex::new(None),
                session_start: Mutex::new(None),
                video_ended: AtomicBool::new(false),
                audio_ended: AtomicBool::new(false),
                completion: Mutex::new(None),
                finalize_deadline: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Path of the file being written
    pub fn output_path(&self) -> PathBuf {
        lock_recovering(&self.inner.output_path).clone()
    }

    pub fn settings(&self) -> &GstWriterSettings {
        &self.inner.settings
    }

    fn spawn_bus_loop(&self, bus: gst::Bus) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let bus_loop = TickLoop::start("movie-writer-bus", None, move || {
            let Some(inner) = weak.upgrade() else {
                return LoopAction::Stop;
            };

            if let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL_MS)) {
                match msg.view() {
                    gst::MessageView::Error(err) => {
                        error!(
                            error = %err.error(),
                            debug = ?err.debug(),
                            source = ?err.src().map(|s| s.name()),
                            "Recording pipeline error"
                        );
                        inner.set_status(WriterStatus::Failed(err.error().to_string()));
                        if inner.is_finishing() {
                            inner.complete();
                            return LoopAction::Stop;
                        }
                    }
                    gst::MessageView::Warning(w) => {
                        warn!(warning = %w.error(), "Recording pipeline warning");
                    }
                    gst::MessageView::Eos(_) => {
                        debug!("Recording pipeline reached EOS");
                        inner.complete();
                        return LoopAction::Stop;
                    }
                    _ => {}
                }
            }

            if inner.finalize_timed_out() {
                warn!(
                    timeout_secs = FINALIZE_TIMEOUT.as_secs(),
                    "EOS not received in time, forcing pipeline down"
                );
                inner.complete();
                return LoopAction::Stop;
            }
            LoopAction::Continue
        });
        lock_recovering(&self.inner.workers).push(bus_loop);
    }
}

fn make(name: &str) -> Result<gst::Element, RecordingError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| RecordingError::PipelineError(format!("Failed to create {}: {}", name, e)))
}

fn make_appsrc(name: &str, caps: &gst::Caps) -> Result<gst_app::AppSrc, RecordingError> {
    let appsrc = gst::ElementFactory::make("appsrc")
        .name(name)
        .build()
        .map_err(|e| RecordingError::PipelineError(format!("Failed to create appsrc: {}", e)))?
        .downcast::<gst_app::AppSrc>()
        .map_err(|_| RecordingError::PipelineError("Failed to downcast to AppSrc".to_string()))?;

    appsrc.set_caps(Some(caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_is_live(false);
    appsrc.set_do_timestamp(false);
    appsrc.set_block(false);
    appsrc.set_max_bytes(APPSRC_MAX_BYTES);
    Ok(appsrc)
}

fn link_error(what: &str) -> impl FnOnce(gst::glib::BoolError) -> RecordingError + '_ {
    move |e| RecordingError::PipelineError(format!("Failed to link {}: {}", what, e))
}

fn build_pipeline(
    settings: &GstWriterSettings,
    encoders: SelectedEncoders,
    requested_path: &Path,
) -> Result<(Built, PathBuf), RecordingError> {
    let pipeline = gst::Pipeline::new();
    let mux = create_muxer(encoders.container, requested_path)?;

    let video_caps = gst::Caps::builder("video/x-raw")
        .field("format", "RGBA")
        .field("width", settings.width as i32)
        .field("height", settings.height as i32)
        .field("framerate", gst::Fraction::new(settings.framerate.max(1) as i32, 1))
        .build();
    let video_src = make_appsrc("movie_video_src", &video_caps)?;
    let video_queue = make("queue")?;
    let videoconvert = make("videoconvert")?;
    let video = encoders.video;

    pipeline
        .add_many([
            video_src.upcast_ref(),
            &video_queue,
            &videoconvert,
            &video.encoder,
            &mux.muxer,
            &mux.filesink,
        ])
        .map_err(|e| RecordingError::PipelineError(format!("Failed to add elements: {}", e)))?;
    if let Some(parser) = &video.parser {
        pipeline
            .add(parser)
            .map_err(|e| RecordingError::PipelineError(format!("Failed to add parser: {}", e)))?;
    }

    gst::Element::link_many([
        video_src.upcast_ref(),
        &video_queue,
        &videoconvert,
        &video.encoder,
    ])
    .map_err(link_error("video branch"))?;
    link_to_muxer(&video.encoder, video.parser.as_ref(), &mux.muxer)?;
    link_muxer_to_sink(&mux.muxer, &mux.filesink)?;

    let audio_src = match encoders.audio {
        Some(audio) => {
            let format = settings.audio_format;
            let audio_caps = gst::Caps::builder("audio/x-raw")
                .field("format", format.sample_format.caps_name())
                .field("layout", "interleaved")
                .field("rate", format.sample_rate as i32)
                .field("channels", format.channels as i32)
                .build();
            let audio_src = make_appsrc("movie_audio_src", &audio_caps)?;
            let audio_queue = make("queue")?;
            let audioconvert = make("audioconvert")?;
            let audioresample = make("audioresample")?;

            pipeline
                .add_many([
                    audio_src.upcast_ref(),
                    &audio_queue,
                    &audioconvert,
                    &audioresample,
                    &audio.encoder,
                ])
                .map_err(|e| {
                    RecordingError::PipelineError(format!("Failed to add audio elements: {}", e))
                })?;
            gst::Element::link_many([
                audio_src.upcast_ref(),
                &audio_queue,
                &audioconvert,
                &audioresample,
                &audio.encoder,
            ])
            .map_err(link_error("audio branch"))?;
            link_to_muxer(&audio.encoder, None, &mux.muxer)?;
            info!(encoder = audio.element_name, codec = ?audio.codec, "Audio branch linked");
            Some(audio_src)
        }
        None => None,
    };

    info!(
        encoder = %video.info.element_name,
        container = ?encoders.container,
        audio = audio_src.is_some(),
        "Recording pipeline built"
    );

    Ok((
        Built {
            pipeline,
            video_src,
            audio_src,
        },
        mux.output_path,
    ))
}

impl MovieWriter for GstMovieWriter {
    fn start_writing(&self) -> Result<(), String> {
        let inner = &self.inner;
        let mut built = lock_recovering(&inner.built);
        if built.is_some() || inner.status() != WriterStatus::Unknown {
            return Err("writer already started".to_string());
        }

        gst::init().map_err(|e| format!("GStreamer init: {}", e))?;

        let settings = &inner.settings;
        let audio_enabled = inner.audio_enabled.load(Ordering::SeqCst);
        let config = EncoderConfig {
            codec_preference: settings.codec_preference,
            container: settings.container,
            bitrate_preset: settings.bitrate_preset,
            width: settings.width,
            audio_channels: audio_enabled.then_some(settings.audio_format.channels),
        };

        let requested = lock_recovering(&inner.output_path).clone();
        let result = select_encoders(&config)
            .and_then(|encoders| build_pipeline(settings, encoders, &requested));
        let (pipeline, output_path) = match result {
            Ok(built) => built,
            Err(e) => {
                inner.set_status(WriterStatus::Failed(e.to_string()));
                return Err(e.to_string());
            }
        };

        if let Err(e) = pipeline.pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.pipeline.set_state(gst::State::Null);
            inner.set_status(WriterStatus::Failed(e.to_string()));
            return Err(format!("Failed to start recording pipeline: {}", e));
        }

        let bus = pipeline.pipeline.bus();
        *lock_recovering(&inner.output_path) = output_path.clone();
        *built = Some(pipeline);
        drop(built);

        match bus {
            Some(bus) => self.spawn_bus_loop(bus),
            None => warn!("Recording pipeline has no bus, errors will not be reported"),
        }

        inner.set_status(WriterStatus::Writing);
        info!(path = %output_path.display(), "Movie writer started");
        Ok(())
    }

    fn start_session(&self, start: Timestamp) {
        *lock_recovering(&self.inner.session_start) = Some(start);
        debug!(start = %start, "Writer session anchored");
    }

    fn status(&self) -> WriterStatus {
        self.inner.status()
    }

    fn enable_audio(&self) {
        if self.inner.status() != WriterStatus::Unknown {
            warn!("Audio must be enabled before the writer starts");
            return;
        }
        self.inner.audio_enabled.store(true, Ordering::SeqCst);
    }

    fn is_ready_for_more_media_data(&self, stream: StreamKind) -> bool {
        let inner = &self.inner;
        inner.status() == WriterStatus::Writing
            && !inner.ended(stream).load(Ordering::SeqCst)
            && inner.has_room(stream)
    }

    fn request_media_data_when_ready(&self, stream: StreamKind, handler: DataRequestHandler) {
        if self.inner.appsrc(stream).is_none() {
            warn!(%stream, "No input for stream, ignoring data request handler");
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut handler = handler;
        let pump = TickLoop::start(
            &format!("movie-writer-{}", stream),
            Some(PUMP_INTERVAL),
            move || {
                let Some(inner) = weak.upgrade() else {
                    return LoopAction::Stop;
                };
                if inner.ended(stream).load(Ordering::SeqCst) {
                    return LoopAction::Stop;
                }
                match inner.status() {
                    WriterStatus::Writing => {}
                    WriterStatus::Unknown => return LoopAction::Continue,
                    _ => return LoopAction::Stop,
                }
                let ready = inner.has_room(stream);
                drop(inner);
                if ready {
                    handler();
                }
                LoopAction::Continue
            },
        );
        lock_recovering(&self.inner.workers).push(pump);
    }

    fn append_video(&self, frame: VideoFrame) -> bool {
        let inner = &self.inner;
        if inner.status() != WriterStatus::Writing || inner.video_ended.load(Ordering::SeqCst) {
            return false;
        }
        let Some(src) = inner.appsrc(StreamKind::Video) else {
            return false;
        };
        let Some(pts) = inner.pts(frame.time) else {
            warn!("Video appended before the session started");
            return false;
        };

        let frame_ns = 1_000_000_000 / inner.settings.framerate.max(1) as u64;
        let mut buffer = gst::Buffer::from_mut_slice(frame.buffer);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(pts);
            buffer.set_duration(gst::ClockTime::from_nseconds(frame_ns));
        }

        match src.push_buffer(buffer) {
            Ok(_) => true,
            Err(e) => {
                warn!(?e, "Failed to push video buffer");
                false
            }
        }
    }

    fn append_audio(&self, sample: AudioSample) -> bool {
        let inner = &self.inner;
        if inner.status() != WriterStatus::Writing || inner.audio_ended.load(Ordering::SeqCst) {
            return false;
        }
        if sample.format != inner.settings.audio_format {
            warn!(
                got = ?sample.format,
                expected = ?inner.settings.audio_format,
                "Audio sample format does not match the writer input"
            );
            return false;
        }
        let Some(src) = inner.appsrc(StreamKind::Audio) else {
            return false;
        };
        let Some(pts) = inner.pts(sample.time) else {
            warn!("Audio appended before the session started");
            return false;
        };

        let duration = sample.duration();
        let mut buffer = gst::Buffer::from_mut_slice(sample.data);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(pts);
            buffer.set_duration(gst::ClockTime::from_nseconds(duration.as_nanos() as u64));
        }

        match src.push_buffer(buffer) {
            Ok(_) => true,
            Err(e) => {
                warn!(?e, "Failed to push audio buffer");
                false
            }
        }
    }

    fn mark_finished(&self, stream: StreamKind) {
        self.inner.end_stream(stream);
    }

    fn finish_writing(&self, on_complete: CompletionHandler) {
        let inner = &self.inner;
        {
            let built = lock_recovering(&inner.built);
            if built.is_none() {
                drop(built);
                // Never started, or the pipeline already reached EOS
                if inner.status() == WriterStatus::Unknown {
                    inner.set_status(WriterStatus::Cancelled);
                }
                on_complete();
                return;
            }
            *lock_recovering(&inner.completion) = Some(on_complete);
            *lock_recovering(&inner.finalize_deadline) = Some(Instant::now() + FINALIZE_TIMEOUT);
        }

        info!("Finalizing movie");
        inner.end_stream(StreamKind::Video);
        if inner.audio_enabled.load(Ordering::SeqCst) {
            inner.end_stream(StreamKind::Audio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_before_start_completes() {
        let writer = GstMovieWriter::new("/tmp/never.mp4", GstWriterSettings::default());
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        writer.finish_writing(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(writer.status(), WriterStatus::Cancelled);
    }

    #[test]
    fn test_not_ready_before_start() {
        let writer = GstMovieWriter::new("/tmp/never.mp4", GstWriterSettings::default());
        writer.enable_audio();
        assert!(!writer.is_ready_for_more_media_data(StreamKind::Video));
        assert!(!writer.is_ready_for_more_media_data(StreamKind::Audio));
    }
}
