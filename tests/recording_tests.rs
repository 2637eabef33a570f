// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the movie sink against a scripted writer

use frame_pipeline::gpu::{GpuContext, HeadlessContext, PixelFormat};
use frame_pipeline::graph::{FrameConsumer, Timestamp};
use frame_pipeline::media::{AudioFormat, AudioSample, VideoFrame};
use frame_pipeline::pipelines::video::{
    CompletionHandler, DataRequestHandler, MovieSettings, MovieSink, MovieWriter, SessionState,
    StreamKind, WriterStatus,
};
use frame_pipeline::sources::AudioEncodingTarget;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Writer that accepts everything and pulls only when told to
#[derive(Default)]
struct ScriptedWriter {
    status: Mutex<WriterStatus>,
    audio: Mutex<bool>,
    sessions: Mutex<Vec<Timestamp>>,
    handlers: Mutex<HashMap<StreamKind, DataRequestHandler>>,
    video: Mutex<Vec<Timestamp>>,
    samples: Mutex<Vec<Timestamp>>,
    finished: Mutex<Vec<StreamKind>>,
}

impl ScriptedWriter {
    /// Run the pull handler of `stream` `times` times
    fn pump(&self, stream: StreamKind, times: usize) {
        let mut handlers = self.handlers.lock().unwrap();
        if let Some(handler) = handlers.get_mut(&stream) {
            for _ in 0..times {
                handler();
            }
        }
    }
}

impl MovieWriter for ScriptedWriter {
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
    fn enable_audio(&self) {
        *self.audio.lock().unwrap() = true;
    }
    fn is_ready_for_more_media_data(&self, _stream: StreamKind) -> bool {
        true
    }
    fn request_media_data_when_ready(&self, stream: StreamKind, handler: DataRequestHandler) {
        self.handlers.lock().unwrap().insert(stream, handler);
    }
    fn append_video(&self, frame: VideoFrame) -> bool {
        self.video.lock().unwrap().push(frame.time);
        true
    }
    fn append_audio(&self, sample: AudioSample) -> bool {
        self.samples.lock().unwrap().push(sample.time);
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

type Sink = MovieSink<HeadlessContext, ScriptedWriter>;

fn sink() -> (Arc<HeadlessContext>, Sink) {
    let context = Arc::new(HeadlessContext::new());
    let settings = MovieSettings {
        width: 8,
        height: 8,
        pool_size: 4,
        ..MovieSettings::default()
    };
    let sink = MovieSink::new(Arc::clone(&context), Arc::new(ScriptedWriter::default()), settings)
        .unwrap();
    (context, sink)
}

fn feed(context: &HeadlessContext, sink: &mut Sink, ms: u64) {
    let input = context
        .allocate_texture(8, 8, PixelFormat::Rgba8Unorm)
        .unwrap();
    sink.new_frame_ready(input, Timestamp::from_millis(ms), context.new_command_buffer());
}

fn tone(ms: u64) -> AudioSample {
    AudioSample::new(vec![0; 64], Timestamp::from_millis(ms), AudioFormat::default())
}

#[test]
fn test_non_increasing_times_dropped() {
    let (context, mut sink) = sink();
    let control = sink.control();
    control.start().unwrap();

    for ms in [0, 33, 33, 66] {
        feed(&context, &mut sink, ms);
    }
    let stats = control.stats();
    assert_eq!(stats.video_accepted, 3);
    assert_eq!(stats.video_dropped_duplicate, 1);
    assert_eq!(control.queued_video(), 3);
}

#[test]
fn test_movie_frames_wait_for_gpu() {
    let (context, mut sink) = sink();
    sink.control().start().unwrap();
    feed(&context, &mut sink, 0);

    let committed = context.committed();
    assert_eq!(committed.len(), 1);
    assert!(committed[0].waited);
    assert_eq!(context.stats().readbacks, 1);
}

#[test]
fn test_first_sample_fixes_session_start() {
    let (context, mut sink) = sink();
    let control = sink.control();
    control.enable_audio();
    control.start().unwrap();

    control.process_audio(tone(20));
    feed(&context, &mut sink, 40);

    assert_eq!(control.session_state(), SessionState::Started(Timestamp::from_millis(20)));
    let writer = control.writer();
    assert_eq!(writer.sessions.lock().unwrap().as_slice(), &[Timestamp::from_millis(20)]);
    assert_eq!(writer.handlers.lock().unwrap().len(), 2);
    assert!(*writer.audio.lock().unwrap());
}

#[test]
fn test_second_start_is_noop() {
    let (context, mut sink) = sink();
    let control = sink.control();
    control.start().unwrap();
    feed(&context, &mut sink, 0);
    control.start().unwrap();

    assert_eq!(control.session_start(), Some(Timestamp::ZERO));
    assert_eq!(control.queued_video(), 1);
}

#[test]
fn test_pull_appends_in_order() {
    let (context, mut sink) = sink();
    let control = sink.control();
    control.start().unwrap();
    for ms in [0, 33, 66] {
        feed(&context, &mut sink, ms);
    }

    control.writer().pump(StreamKind::Video, 5);

    assert_eq!(
        control.writer().video.lock().unwrap().as_slice(),
        &[Timestamp::ZERO, Timestamp::from_millis(33), Timestamp::from_millis(66)]
    );
    assert_eq!(control.stats().video_appended, 3);
    assert_eq!(control.queued_video(), 0);
}

#[test]
fn test_pool_exhaustion_drops_frames() {
    let (context, mut sink) = sink();
    let control = sink.control();
    control.start().unwrap();
    for ms in 0..6 {
        feed(&context, &mut sink, ms * 10);
    }
    let stats = control.stats();
    assert_eq!(stats.video_accepted, 4);
    assert_eq!(stats.video_dropped_pool_exhausted, 2);

    // Appended frames return their buffers
    control.writer().pump(StreamKind::Video, 4);
    feed(&context, &mut sink, 100);
    assert_eq!(control.stats().video_accepted, 5);
}

#[test]
fn test_stop_empties_queues_and_goes_idle() {
    let (context, mut sink) = sink();
    let control = sink.control();
    control.enable_audio();
    control.start().unwrap();
    feed(&context, &mut sink, 0);
    control.process_audio(tone(5));

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    assert!(control.stop(move || done_tx.send(()).unwrap()));
    done_rx.recv().unwrap();

    assert!(!control.is_recording());
    assert_eq!(control.queued_video(), 0);
    assert_eq!(control.queued_audio(), 0);
    assert_eq!(control.writer_status(), WriterStatus::Completed);
    assert_eq!(
        control.writer().finished.lock().unwrap().as_slice(),
        &[StreamKind::Video, StreamKind::Audio]
    );

    // Idle again: frames are committed without being queued
    feed(&context, &mut sink, 33);
    assert_eq!(control.stats().video_dropped_idle, 1);
    assert!(!control.stop(|| {}));
}

#[test]
fn test_audio_refused_without_enable() {
    let (_context, sink) = sink();
    let control = sink.control();
    control.start().unwrap();
    control.process_audio(tone(0));
    assert_eq!(control.stats().audio_dropped, 1);
    assert_eq!(control.session_state(), SessionState::NotStarted);
}
