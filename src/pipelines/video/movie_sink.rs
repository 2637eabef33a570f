// SPDX-License-Identifier: GPL-3.0-only

//! Synchronized movie sink
//!
//! The sink is split in two:
//! - [`MovieSink`] is the graph node. It runs on the thread that ticks the
//!   graph, draws each frame into an output-sized texture (placed with the
//!   configured fill mode), waits for the GPU and reads the result back
//!   into a pooled CPU buffer.
//! - [`RecordingControl`] is a cloneable handle to the recording session.
//!   It starts and stops recording, takes audio from sources and feeds both
//!   hand-off queues to the writer when the writer asks for data.
//!
//! Two locks serialize the session. The session lock fixes the start time
//! from whichever stream arrives first, registers the writer's pull handlers
//! once and guards audio enqueueing. The dedup lock admits only video frames
//! whose time is strictly after the last accepted frame. Neither lock is held
//! while waiting on the GPU.

use super::writer::{MovieWriter, StreamKind, WriterStatus};
use crate::constants::graph::{CLEAR_COLOR, QUAD_INDEX_COUNT};
use crate::constants::recording::{DEFAULT_HEIGHT, DEFAULT_POOL_SIZE, DEFAULT_WIDTH};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::constants::BackpressurePolicy;
use crate::errors::{GpuError, RecordingError};
use crate::filters::{FillMode, QUAD_INDICES, QUAD_VERTICES, TextureRotation};
use crate::gpu::{
    Bindings, BufferUsage, CachedDimensions, CommandBuffer, GpuContext, GpuTexture, LoadAction,
    PixelFormat, RenderPass, TextureSlot,
};
use crate::graph::{FrameConsumer, Timestamp};
use crate::handoff_queue::{HandoffQueue, lock_recovering};
use crate::media::{AudioSample, PixelBufferPool, VideoFrame};
use crate::shaders::{BASIC_FRAGMENT, BASIC_VERTEX};
use crate::sources::AudioEncodingTarget;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, trace, warn};

/// Output and policy settings of a movie sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovieSettings {
    pub width: u32,
    pub height: u32,
    pub fill_mode: FillMode,
    pub backpressure: BackpressurePolicy,
    /// Number of CPU frames that may be waiting for the encoder at once
    pub pool_size: usize,
}

impl Default for MovieSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fill_mode: FillMode::AspectFit,
            backpressure: BackpressurePolicy::default(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Timeline state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NotStarted,
    /// First sample seen; its time anchors the movie
    Started(Timestamp),
    Finished,
}

/// Counters for one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingStats {
    /// Frames that passed the timestamp check and were queued
    pub video_accepted: u64,
    /// Frames handed to the writer
    pub video_appended: u64,
    /// Frames received while not recording
    pub video_dropped_idle: u64,
    /// Frames whose time did not advance
    pub video_dropped_duplicate: u64,
    /// Frames without a free pixel buffer
    pub video_dropped_pool_exhausted: u64,
    /// Frames refused because the stream or writer could take no more
    pub video_dropped_refused: u64,
    /// Frames lost to GPU submission or readback errors
    pub video_dropped_gpu: u64,
    pub audio_accepted: u64,
    pub audio_appended: u64,
    pub audio_dropped: u64,
}

#[derive(Default)]
struct StatCounters {
    video_accepted: AtomicU64,
    video_appended: AtomicU64,
    video_dropped_idle: AtomicU64,
    video_dropped_duplicate: AtomicU64,
    video_dropped_pool_exhausted: AtomicU64,
    video_dropped_refused: AtomicU64,
    video_dropped_gpu: AtomicU64,
    audio_accepted: AtomicU64,
    audio_appended: AtomicU64,
    audio_dropped: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> RecordingStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RecordingStats {
            video_accepted: get(&self.video_accepted),
            video_appended: get(&self.video_appended),
            video_dropped_idle: get(&self.video_dropped_idle),
            video_dropped_duplicate: get(&self.video_dropped_duplicate),
            video_dropped_pool_exhausted: get(&self.video_dropped_pool_exhausted),
            video_dropped_refused: get(&self.video_dropped_refused),
            video_dropped_gpu: get(&self.video_dropped_gpu),
            audio_accepted: get(&self.audio_accepted),
            audio_appended: get(&self.audio_appended),
            audio_dropped: get(&self.audio_dropped),
        }
    }
}

struct Session {
    state: SessionState,
    handlers_registered: bool,
}

struct Shared<W: MovieWriter> {
    writer: Arc<W>,
    backpressure: BackpressurePolicy,
    pool: PixelBufferPool,
    is_recording: AtomicBool,
    /// Session lock
    session: Mutex<Session>,
    /// Dedup lock: time of the last accepted video frame
    last_video_time: Mutex<Option<Timestamp>>,
    video_queue: HandoffQueue<VideoFrame>,
    audio_queue: HandoffQueue<AudioSample>,
    video_finished: AtomicBool,
    audio_finished: AtomicBool,
    audio_enabled: AtomicBool,
    failure_logged: AtomicBool,
    stats: StatCounters,
}

impl<W: MovieWriter> Shared<W> {
    fn finished_flag(&self, stream: StreamKind) -> &AtomicBool {
        match stream {
            StreamKind::Video => &self.video_finished,
            StreamKind::Audio => &self.audio_finished,
        }
    }

    /// Start the session at `time` if this is the first sample
    ///
    /// Must be called with the session lock held. Returns false when the
    /// sample must be dropped because the sink is no longer recording.
    fn start_session_locked(self: &Arc<Self>, session: &mut Session, time: Timestamp) -> bool {
        if !self.is_recording.load(Ordering::SeqCst) {
            return false;
        }

        match session.state {
            SessionState::NotStarted => {
                self.writer.start_session(time);
                session.state = SessionState::Started(time);
                info!(start = %time, "Recording session started");
            }
            SessionState::Started(_) => {}
            SessionState::Finished => return false,
        }

        if !session.handlers_registered {
            session.handlers_registered = true;
            self.register_pull_handler(StreamKind::Video);
            if self.audio_enabled.load(Ordering::SeqCst) {
                self.register_pull_handler(StreamKind::Audio);
            }
        }
        true
    }

    fn register_pull_handler(self: &Arc<Self>, stream: StreamKind) {
        // The writer owns the handler; a weak reference keeps it from owning the sink
        let weak: Weak<Self> = Arc::downgrade(self);
        self.writer.request_media_data_when_ready(
            stream,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.pull(stream);
                }
            }),
        );
        debug!(%stream, "Pull handler registered");
    }

    /// Feed at most one queued item of `stream` to the writer
    fn pull(&self, stream: StreamKind) {
        if self.writer.status() != WriterStatus::Writing {
            return;
        }
        if self.finished_flag(stream).load(Ordering::SeqCst) {
            return;
        }

        if !self.writer.is_ready_for_more_media_data(stream) {
            match self.backpressure {
                BackpressurePolicy::FinishStream => {
                    if !self.finished_flag(stream).swap(true, Ordering::SeqCst) {
                        warn!(%stream, "Writer not ready, finishing stream for this session");
                        self.writer.mark_finished(stream);
                    }
                }
                BackpressurePolicy::Pause => {
                    trace!(%stream, "Writer not ready, waiting for next request");
                }
            }
            return;
        }

        match stream {
            StreamKind::Video => {
                let Some(frame) = self.video_queue.dequeue() else {
                    return;
                };
                let time = frame.time;
                if self.writer.append_video(frame) {
                    StatCounters::bump(&self.stats.video_appended);
                } else {
                    error!(time = %time, status = ?self.writer.status(), "Writer rejected video frame");
                }
            }
            StreamKind::Audio => {
                let Some(sample) = self.audio_queue.dequeue() else {
                    return;
                };
                let time = sample.time;
                if self.writer.append_audio(sample) {
                    StatCounters::bump(&self.stats.audio_appended);
                } else {
                    error!(time = %time, status = ?self.writer.status(), "Writer rejected audio sample");
                }
            }
        }
    }

    /// True when the writer failed; logs the failure once
    fn writer_failed(&self) -> bool {
        if let WriterStatus::Failed(reason) = self.writer.status() {
            if !self.failure_logged.swap(true, Ordering::SeqCst) {
                error!(%reason, "Movie writer failed, refusing further media until stopped");
            }
            return true;
        }
        false
    }
}

/// Cloneable handle to a movie sink's recording session
pub struct RecordingControl<W: MovieWriter> {
    shared: Arc<Shared<W>>,
}

impl<W: MovieWriter> Clone for RecordingControl<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<W: MovieWriter> RecordingControl<W> {
    fn new(writer: Arc<W>, settings: &MovieSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                writer,
                backpressure: settings.backpressure,
                pool: PixelBufferPool::new(settings.width, settings.height, settings.pool_size),
                is_recording: AtomicBool::new(false),
                session: Mutex::new(Session {
                    state: SessionState::NotStarted,
                    handlers_registered: false,
                }),
                last_video_time: Mutex::new(None),
                video_queue: HandoffQueue::new(),
                audio_queue: HandoffQueue::new(),
                video_finished: AtomicBool::new(false),
                audio_finished: AtomicBool::new(false),
                audio_enabled: AtomicBool::new(false),
                failure_logged: AtomicBool::new(false),
                stats: StatCounters::default(),
            }),
        }
    }

    /// Begin recording
    ///
    /// The session start time is fixed later by the first sample to arrive.
    /// Starting while already recording is a no-op.
    pub fn start(&self) -> Result<(), RecordingError> {
        let shared = &self.shared;
        let mut session = lock_recovering(&shared.session);
        if shared.is_recording.load(Ordering::SeqCst) {
            warn!("Recording already in progress, ignoring start");
            return Ok(());
        }

        shared
            .writer
            .start_writing()
            .map_err(RecordingError::StartFailed)?;

        session.state = SessionState::NotStarted;
        session.handlers_registered = false;
        *lock_recovering(&shared.last_video_time) = None;
        shared.video_finished.store(false, Ordering::SeqCst);
        shared.audio_finished.store(false, Ordering::SeqCst);
        shared.failure_logged.store(false, Ordering::SeqCst);
        shared.is_recording.store(true, Ordering::SeqCst);

        info!(
            audio = shared.audio_enabled.load(Ordering::SeqCst),
            backpressure = shared.backpressure.display_name(),
            "Recording started"
        );
        Ok(())
    }

    /// Stop recording and finalize the movie
    ///
    /// Both streams are marked finished, the writer finalizes asynchronously
    /// and calls `on_complete` when the file is closed, and both queues are
    /// emptied. Returns false (and does nothing) when not recording.
    pub fn stop(&self, on_complete: impl FnOnce() + Send + 'static) -> bool {
        let shared = &self.shared;
        if !shared.is_recording.swap(false, Ordering::SeqCst) {
            warn!("Not recording, ignoring stop");
            return false;
        }

        let session_started = {
            let mut session = lock_recovering(&shared.session);
            shared.video_finished.store(true, Ordering::SeqCst);
            shared.audio_finished.store(true, Ordering::SeqCst);
            let started = matches!(session.state, SessionState::Started(_));
            session.state = SessionState::Finished;
            started
        };

        shared.writer.mark_finished(StreamKind::Video);
        if shared.audio_enabled.load(Ordering::SeqCst) {
            shared.writer.mark_finished(StreamKind::Audio);
        }
        shared.writer.finish_writing(Box::new(on_complete));

        let video_dropped = {
            let _dedup = lock_recovering(&shared.last_video_time);
            shared.video_queue.drain()
        };
        let audio_dropped = {
            let _session = lock_recovering(&shared.session);
            shared.audio_queue.drain()
        };

        let stats = shared.stats.snapshot();
        info!(
            session_started,
            video_appended = stats.video_appended,
            audio_appended = stats.audio_appended,
            video_dropped,
            audio_dropped,
            "Recording stopped"
        );
        true
    }

    /// End the audio stream while video continues
    pub fn finish_audio(&self) {
        let shared = &self.shared;
        if !shared.is_recording.load(Ordering::SeqCst) {
            return;
        }
        if !shared.audio_finished.swap(true, Ordering::SeqCst)
            && shared.audio_enabled.load(Ordering::SeqCst)
        {
            debug!("Audio stream finished");
            shared.writer.mark_finished(StreamKind::Audio);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.shared.is_recording.load(Ordering::SeqCst)
    }

    pub fn session_state(&self) -> SessionState {
        lock_recovering(&self.shared.session).state
    }

    pub fn session_start(&self) -> Option<Timestamp> {
        match self.session_state() {
            SessionState::Started(time) => Some(time),
            _ => None,
        }
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.shared.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn queued_video(&self) -> usize {
        self.shared.video_queue.len()
    }

    pub fn queued_audio(&self) -> usize {
        self.shared.audio_queue.len()
    }

    pub fn writer_status(&self) -> WriterStatus {
        self.shared.writer.status()
    }

    pub fn writer(&self) -> &Arc<W> {
        &self.shared.writer
    }

    pub fn stats(&self) -> RecordingStats {
        self.shared.stats.snapshot()
    }

    /// Gate checks before any GPU work is spent on a frame
    fn admit_video(&self, time: Timestamp) -> bool {
        let shared = &self.shared;
        if !shared.is_recording.load(Ordering::SeqCst) {
            StatCounters::bump(&shared.stats.video_dropped_idle);
            return false;
        }
        if shared.writer_failed() || shared.video_finished.load(Ordering::SeqCst) {
            StatCounters::bump(&shared.stats.video_dropped_refused);
            return false;
        }

        let mut session = lock_recovering(&shared.session);
        if !shared.start_session_locked(&mut session, time) {
            StatCounters::bump(&shared.stats.video_dropped_idle);
            return false;
        }
        true
    }

    /// Queue a read-back frame if its time advances past the last one
    fn accept_video(&self, frame: VideoFrame) -> bool {
        let shared = &self.shared;
        let mut last = lock_recovering(&shared.last_video_time);
        if !shared.is_recording.load(Ordering::SeqCst) {
            StatCounters::bump(&shared.stats.video_dropped_idle);
            return false;
        }
        if let Some(previous) = *last {
            if frame.time <= previous {
                debug!(time = %frame.time, previous = %previous, "Dropping frame with non-increasing time");
                StatCounters::bump(&shared.stats.video_dropped_duplicate);
                return false;
            }
        }

        *last = Some(frame.time);
        let time = frame.time;
        shared.video_queue.enqueue(frame);
        let accepted = StatCounters::bump(&shared.stats.video_accepted);
        if accepted % FRAME_LOG_INTERVAL == 0 {
            debug!(accepted, time = %time, queued = shared.video_queue.len(), "Video frames accepted");
        }
        true
    }
}

impl<W: MovieWriter> AudioEncodingTarget for RecordingControl<W> {
    /// Add an audio stream to the movie; must happen before [`RecordingControl::start`]
    fn enable_audio(&self) {
        let shared = &self.shared;
        if shared.is_recording.load(Ordering::SeqCst) {
            warn!("Cannot enable audio while recording");
            return;
        }
        if !shared.audio_enabled.swap(true, Ordering::SeqCst) {
            shared.writer.enable_audio();
            info!("Audio enabled for recording");
        }
    }

    fn process_audio(&self, sample: AudioSample) {
        let shared = &self.shared;
        if !shared.audio_enabled.load(Ordering::SeqCst)
            || !shared.is_recording.load(Ordering::SeqCst)
        {
            StatCounters::bump(&shared.stats.audio_dropped);
            return;
        }
        if shared.writer_failed() || shared.audio_finished.load(Ordering::SeqCst) {
            StatCounters::bump(&shared.stats.audio_dropped);
            return;
        }

        let mut session = lock_recovering(&shared.session);
        if !shared.start_session_locked(&mut session, sample.time) {
            StatCounters::bump(&shared.stats.audio_dropped);
            return;
        }
        shared.audio_queue.enqueue(sample);
        StatCounters::bump(&shared.stats.audio_accepted);
    }

    fn finish_audio(&self) {
        RecordingControl::finish_audio(self);
    }
}

/// Graph node turning frames into movie video
pub struct MovieSink<C: GpuContext, W: MovieWriter> {
    context: Arc<C>,
    control: RecordingControl<W>,
    program: C::Program,
    output: TextureSlot<C>,
    positions: C::Buffer,
    tex_coords: C::Buffer,
    indices: C::Buffer,
    fill_mode: FillMode,
    input_dims: CachedDimensions,
    width: u32,
    height: u32,
}

impl<C: GpuContext, W: MovieWriter> MovieSink<C, W> {
    pub fn new(
        context: Arc<C>,
        writer: Arc<W>,
        settings: MovieSettings,
    ) -> Result<Self, RecordingError> {
        let MovieSettings { width, height, .. } = settings;
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions { width, height }.into());
        }

        let program = context.resolve_render_program(BASIC_VERTEX, BASIC_FRAGMENT)?;
        let positions =
            context.allocate_buffer_from("movie_positions", &QUAD_VERTICES, BufferUsage::Vertex)?;
        let tex_coords = context.allocate_buffer_from(
            "movie_tex_coords",
            &TextureRotation::None.tex_coords(),
            BufferUsage::Vertex,
        )?;
        let indices =
            context.allocate_buffer_from("movie_indices", &QUAD_INDICES, BufferUsage::Index)?;

        info!(
            width,
            height,
            fill_mode = ?settings.fill_mode,
            pool = settings.pool_size,
            "Movie sink created"
        );

        Ok(Self {
            control: RecordingControl::new(writer, &settings),
            context,
            program,
            output: TextureSlot::new(PixelFormat::Rgba8Unorm),
            positions,
            tex_coords,
            indices,
            fill_mode: settings.fill_mode,
            input_dims: CachedDimensions::default(),
            width,
            height,
        })
    }

    pub fn control(&self) -> RecordingControl<W> {
        self.control.clone()
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn output_texture(&self) -> Option<&C::Texture> {
        self.output.get()
    }

    /// Recompute quad vertices when the input size changes
    fn update_geometry(&mut self, input: (u32, u32)) {
        if !self.input_dims.needs_update(input.0, input.1) {
            return;
        }
        self.input_dims.update(input.0, input.1);
        let vertices = self
            .fill_mode
            .convert(&QUAD_VERTICES, input, (self.width, self.height));
        self.context
            .write_buffer(&self.positions, bytemuck::cast_slice(&vertices));
        debug!(input_width = input.0, input_height = input.1, ?vertices, "Movie geometry updated");
    }

    /// Draw, wait and read back; `None` when the frame was lost
    fn render_and_read(
        &mut self,
        input: &C::Texture,
        time: Timestamp,
        mut command_buffer: C::CommandBuffer,
    ) -> Option<VideoFrame> {
        let shared = Arc::clone(&self.control.shared);
        let stats = &shared.stats;

        let output = match self.output.ensure(&self.context, self.width, self.height) {
            Ok(texture) => texture.clone(),
            Err(e) => {
                error!(error = %e, "Movie output texture unavailable");
                command_buffer.commit();
                StatCounters::bump(&stats.video_dropped_gpu);
                return None;
            }
        };
        self.update_geometry(input.size());

        command_buffer.encode_render(&RenderPass {
            label: "movie_sink",
            program: &self.program,
            target: &output,
            load: LoadAction::Clear,
            clear_color: CLEAR_COLOR,
            positions: &self.positions,
            tex_coords: &self.tex_coords,
            indices: &self.indices,
            index_count: QUAD_INDEX_COUNT,
            input,
            extra: Bindings::new(2),
        });

        if let Err(e) = command_buffer.commit_and_wait() {
            error!(error = %e, "Movie frame submission failed");
            StatCounters::bump(&stats.video_dropped_gpu);
            return None;
        }

        let Some(mut buffer) = shared.pool.acquire() else {
            warn!(
                capacity = shared.pool.capacity(),
                "Pixel buffer pool exhausted, dropping frame"
            );
            StatCounters::bump(&stats.video_dropped_pool_exhausted);
            return None;
        };

        let bytes_per_row = buffer.bytes_per_row();
        if let Err(e) = self
            .context
            .read_texture(&output, buffer.as_mut(), bytes_per_row)
        {
            error!(error = %e, "Movie frame readback failed");
            StatCounters::bump(&stats.video_dropped_gpu);
            return None;
        }

        Some(VideoFrame { buffer, time })
    }
}

impl<C: GpuContext, W: MovieWriter> FrameConsumer<C> for MovieSink<C, W> {
    fn new_frame_ready(
        &mut self,
        input: C::Texture,
        time: Timestamp,
        command_buffer: C::CommandBuffer,
    ) {
        if !self.control.admit_video(time) {
            // Upstream work still has to run so its resources are released
            command_buffer.commit();
            return;
        }

        if let Some(frame) = self.render_and_read(&input, time, command_buffer) {
            self.control.accept_video(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;
    use crate::pipelines::video::writer::{CompletionHandler, DataRequestHandler};
    use std::collections::HashMap;

    /// Writer that records calls and never pulls on its own
    #[derive(Default)]
    struct NullWriter {
        status: Mutex<WriterStatus>,
        sessions: Mutex<Vec<Timestamp>>,
        handlers: Mutex<HashMap<StreamKind, DataRequestHandler>>,
        finished: Mutex<Vec<StreamKind>>,
    }

    impl MovieWriter for NullWriter {
        fn start_writing(&self) -> Result<(), String> {
            *self.status.lock().unwrap() = WriterStatus::Writing;
            Ok(())
        }
        fn start_session(&self, start: Timestamp) {
            self.sessions.lock().unwrap().push(start);
        }
        fn status(&self) -> WriterStatus {
            self.status.lock().unwrap().clone()
        }
        fn enable_audio(&self) {}
        fn is_ready_for_more_media_data(&self, _stream: StreamKind) -> bool {
            false
        }
        fn request_media_data_when_ready(&self, stream: StreamKind, handler: DataRequestHandler) {
            self.handlers.lock().unwrap().insert(stream, handler);
        }
        fn append_video(&self, _frame: VideoFrame) -> bool {
            true
        }
        fn append_audio(&self, _sample: AudioSample) -> bool {
            true
        }
        fn mark_finished(&self, stream: StreamKind) {
            self.finished.lock().unwrap().push(stream);
        }
        fn finish_writing(&self, on_complete: CompletionHandler) {
            *self.status.lock().unwrap() = WriterStatus::Completed;
            on_complete();
        }
    }

    fn sink(
        backpressure: BackpressurePolicy,
    ) -> (Arc<HeadlessContext>, MovieSink<HeadlessContext, NullWriter>) {
        let context = Arc::new(HeadlessContext::new());
        let settings = MovieSettings {
            width: 16,
            height: 8,
            backpressure,
            ..MovieSettings::default()
        };
        let sink = MovieSink::new(Arc::clone(&context), Arc::new(NullWriter::default()), settings)
            .unwrap();
        (context, sink)
    }

    fn feed(context: &HeadlessContext, sink: &mut MovieSink<HeadlessContext, NullWriter>, ms: u64) {
        let input = context
            .allocate_texture(8, 8, PixelFormat::Rgba8Unorm)
            .unwrap();
        sink.new_frame_ready(input, Timestamp::from_millis(ms), context.new_command_buffer());
    }

    #[test]
    fn test_idle_frames_committed_not_queued() {
        let (context, mut sink) = sink(BackpressurePolicy::FinishStream);
        feed(&context, &mut sink, 0);

        let control = sink.control();
        assert_eq!(control.queued_video(), 0);
        assert_eq!(control.stats().video_dropped_idle, 1);
        let committed = context.committed();
        assert_eq!(committed.len(), 1);
        assert!(!committed[0].waited);
    }

    #[test]
    fn test_handlers_registered_once() {
        let (context, mut sink) = sink(BackpressurePolicy::FinishStream);
        let control = sink.control();
        control.start().unwrap();
        feed(&context, &mut sink, 0);
        feed(&context, &mut sink, 33);

        let writer = control.writer();
        assert_eq!(writer.sessions.lock().unwrap().as_slice(), &[Timestamp::ZERO]);
        assert_eq!(writer.handlers.lock().unwrap().len(), 1);
        assert_eq!(control.queued_video(), 2);
    }

    #[test]
    fn test_not_ready_finishes_stream() {
        let (context, mut sink) = sink(BackpressurePolicy::FinishStream);
        let control = sink.control();
        control.start().unwrap();
        feed(&context, &mut sink, 0);

        let mut handler = control
            .writer()
            .handlers
            .lock()
            .unwrap()
            .remove(&StreamKind::Video)
            .unwrap();
        handler();
        assert_eq!(
            control.writer().finished.lock().unwrap().as_slice(),
            &[StreamKind::Video]
        );

        // Stream is finished for the rest of the session
        feed(&context, &mut sink, 33);
        assert_eq!(control.stats().video_dropped_refused, 1);
        assert_eq!(control.queued_video(), 1);
    }

    #[test]
    fn test_not_ready_pauses_stream() {
        let (context, mut sink) = sink(BackpressurePolicy::Pause);
        let control = sink.control();
        control.start().unwrap();
        feed(&context, &mut sink, 0);

        let mut handler = control
            .writer()
            .handlers
            .lock()
            .unwrap()
            .remove(&StreamKind::Video)
            .unwrap();
        handler();
        assert!(control.writer().finished.lock().unwrap().is_empty());

        feed(&context, &mut sink, 33);
        assert_eq!(control.queued_video(), 2);
    }

    #[test]
    fn test_output_is_fill_mode_placed() {
        let (context, mut sink) = sink(BackpressurePolicy::FinishStream);
        sink.control().start().unwrap();
        feed(&context, &mut sink, 0);

        assert_eq!(sink.output_texture().unwrap().size(), (16, 8));
        let positions: Vec<f32> = sink.positions.as_f32();
        // Square input fit into 2:1 output: x halves, y untouched
        assert!((positions[0] + 0.5).abs() < 1e-6);
        assert!((positions[1] - 1.0).abs() < 1e-6);
    }
}
