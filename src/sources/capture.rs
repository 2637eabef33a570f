// SPDX-License-Identifier: GPL-3.0-only

//! Live capture source
//!
//! Producers (a camera thread, a movie decoder, the test pattern) own a
//! cloneable [`CaptureHandle`] and send CPU frames and audio batches over a
//! channel. The [`CaptureSource`] end lives in the graph: each tick uploads
//! the newest pending frame, discarding older ones, and dispatches the
//! latest texture to every target. Audio is forwarded to the attached
//! [`AudioEncodingTarget`] in arrival order.

use super::AudioEncodingTarget;
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::SourceError;
use crate::gpu::{GpuContext, GpuTexture, PixelFormat};
use crate::graph::{FrameSource, LoopAction, TickLoop, Targets, Timestamp};
use crate::handoff_queue::lock_recovering;
use crate::media::AudioSample;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// RGBA frame produced on the CPU
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub data: Vec<u8>,
    pub time: Timestamp,
}

impl CapturedFrame {
    /// Tightly packed RGBA frame
    pub fn rgba(width: u32, height: u32, data: Vec<u8>, time: Timestamp) -> Self {
        Self {
            width,
            height,
            bytes_per_row: width * 4,
            data,
            time,
        }
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        let needed = self.bytes_per_row as usize * self.height as usize;
        if self.width == 0 || self.height == 0 || self.bytes_per_row < self.width * 4 {
            return Err(SourceError::InvalidFrame(format!(
                "{}x{} with {} bytes per row",
                self.width, self.height, self.bytes_per_row
            )));
        }
        if self.data.len() < needed {
            return Err(SourceError::InvalidFrame(format!(
                "{} bytes for {}x{}, need {}",
                self.data.len(),
                self.width,
                self.height,
                needed
            )));
        }
        Ok(())
    }
}

enum CaptureMessage {
    Frame(CapturedFrame),
    Audio(AudioSample),
    AudioFinished,
}

/// Producer end of a capture source
#[derive(Clone)]
pub struct CaptureHandle {
    sender: Sender<CaptureMessage>,
}

impl CaptureHandle {
    /// Returns false once the source is gone
    pub fn send_frame(&self, frame: CapturedFrame) -> bool {
        self.sender.send(CaptureMessage::Frame(frame)).is_ok()
    }

    pub fn send_audio(&self, sample: AudioSample) -> bool {
        self.sender.send(CaptureMessage::Audio(sample)).is_ok()
    }

    /// No more audio will be sent by this producer
    pub fn finish_audio(&self) {
        let _ = self.sender.send(CaptureMessage::AudioFinished);
    }
}

/// Outcome of one [`CaptureSource::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// A new frame was uploaded
    pub uploaded: bool,
    /// Pending frames superseded by a newer one
    pub skipped: u32,
    /// Audio samples forwarded
    pub audio: u32,
    /// Every producer handle has been dropped
    pub disconnected: bool,
}

/// Graph source fed by a [`CaptureHandle`]
pub struct CaptureSource<C: GpuContext> {
    context: Arc<C>,
    receiver: Receiver<CaptureMessage>,
    targets: Targets<C>,
    texture: Option<C::Texture>,
    latest_time: Option<Timestamp>,
    audio_target: Option<Arc<dyn AudioEncodingTarget>>,
    frames_uploaded: u64,
    frames_dropped: u64,
    disconnected: bool,
}

impl<C: GpuContext> CaptureSource<C> {
    pub fn new(context: Arc<C>) -> (Self, CaptureHandle) {
        let (sender, receiver) = mpsc::channel();
        let source = Self {
            context,
            receiver,
            targets: Targets::new(),
            texture: None,
            latest_time: None,
            audio_target: None,
            frames_uploaded: 0,
            frames_dropped: 0,
            disconnected: false,
        };
        (source, CaptureHandle { sender })
    }

    /// Route this source's audio to `target`
    pub fn attach_audio_target(&mut self, target: Arc<dyn AudioEncodingTarget>) {
        target.enable_audio();
        self.audio_target = Some(target);
        debug!("Audio target attached");
    }

    pub fn detach_audio_target(&mut self) {
        self.audio_target = None;
    }

    pub fn has_audio_target(&self) -> bool {
        self.audio_target.is_some()
    }

    /// Texture of the most recently uploaded frame
    pub fn latest_texture(&self) -> Option<&C::Texture> {
        self.texture.as_ref()
    }

    pub fn latest_time(&self) -> Option<Timestamp> {
        self.latest_time
    }

    pub fn frames_uploaded(&self) -> u64 {
        self.frames_uploaded
    }

    /// Frames superseded before upload or arriving out of order
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Drain pending input, upload the newest frame and dispatch
    ///
    /// Without new input the latest texture is dispatched again with its
    /// original time.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let mut newest: Option<CapturedFrame> = None;

        loop {
            match self.receiver.try_recv() {
                Ok(CaptureMessage::Frame(frame)) => {
                    if self.latest_time.is_some_and(|latest| frame.time < latest) {
                        trace!(time = %frame.time, "Late frame discarded");
                        self.frames_dropped += 1;
                        continue;
                    }
                    if newest.replace(frame).is_some() {
                        report.skipped += 1;
                        self.frames_dropped += 1;
                    }
                }
                Ok(CaptureMessage::Audio(sample)) => {
                    if let Some(target) = &self.audio_target {
                        target.process_audio(sample);
                        report.audio += 1;
                    }
                }
                Ok(CaptureMessage::AudioFinished) => {
                    if let Some(target) = &self.audio_target {
                        target.finish_audio();
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        info!(uploaded = self.frames_uploaded, "Capture producers disconnected");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
        report.disconnected = self.disconnected;

        if let Some(frame) = newest {
            match self.upload(&frame) {
                Ok(()) => {
                    report.uploaded = true;
                    self.latest_time = Some(frame.time);
                    self.frames_uploaded += 1;
                    if self.frames_uploaded % FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            uploaded = self.frames_uploaded,
                            dropped = self.frames_dropped,
                            time = %frame.time,
                            "Capture progress"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Captured frame rejected");
                    self.frames_dropped += 1;
                }
            }
        }

        if let (Some(texture), Some(time)) = (&self.texture, self.latest_time) {
            self.targets.broadcast(&self.context, texture, time);
        }
        report
    }

    /// Reuse the texture when the size is unchanged
    fn upload(&mut self, frame: &CapturedFrame) -> Result<(), SourceError> {
        frame.validate()?;
        let reusable = self
            .texture
            .as_ref()
            .is_some_and(|t| t.size() == (frame.width, frame.height));

        if reusable {
            if let Some(texture) = &self.texture {
                self.context
                    .write_texture(texture, &frame.data, frame.bytes_per_row)?;
            }
        } else {
            let texture = self.context.upload_texture(
                frame.width,
                frame.height,
                PixelFormat::Rgba8Unorm,
                &frame.data,
                frame.bytes_per_row,
            )?;
            info!(width = frame.width, height = frame.height, "Capture texture allocated");
            self.texture = Some(texture);
        }
        Ok(())
    }
}

impl<C: GpuContext> FrameSource<C> for CaptureSource<C> {
    fn targets(&self) -> &Targets<C> {
        &self.targets
    }

    fn targets_mut(&mut self) -> &mut Targets<C> {
        &mut self.targets
    }
}

/// Tick `source` every `interval` on a display-link thread
///
/// The loop stops once every producer is gone and the last frame has been
/// dispatched.
pub fn spawn_display_link<C: GpuContext>(
    source: Arc<Mutex<CaptureSource<C>>>,
    interval: Duration,
) -> TickLoop {
    TickLoop::start("display-link", Some(interval), move || {
        let report = lock_recovering(&source).tick();
        if report.disconnected && !report.uploaded {
            LoopAction::Stop
        } else {
            LoopAction::Continue
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{CommandBuffer, HeadlessContext};
    use crate::graph::{FrameConsumer, shared};
    use crate::media::AudioFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        times: Arc<Mutex<Vec<Timestamp>>>,
    }

    impl FrameConsumer<HeadlessContext> for Recorder {
        fn new_frame_ready(
            &mut self,
            _input: <HeadlessContext as GpuContext>::Texture,
            time: Timestamp,
            command_buffer: <HeadlessContext as GpuContext>::CommandBuffer,
        ) {
            self.times.lock().unwrap().push(time);
            command_buffer.commit();
        }
    }

    #[derive(Default)]
    struct AudioCounter {
        enabled: AtomicUsize,
        samples: AtomicUsize,
        finished: AtomicUsize,
    }

    impl AudioEncodingTarget for AudioCounter {
        fn enable_audio(&self) {
            self.enabled.fetch_add(1, Ordering::SeqCst);
        }
        fn process_audio(&self, _sample: AudioSample) {
            self.samples.fetch_add(1, Ordering::SeqCst);
        }
        fn finish_audio(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(time_ms: u64) -> CapturedFrame {
        CapturedFrame::rgba(2, 2, vec![255; 16], Timestamp::from_millis(time_ms))
    }

    #[test]
    fn test_newest_frame_wins() {
        let context = Arc::new(HeadlessContext::new());
        let (mut source, handle) = CaptureSource::new(Arc::clone(&context));
        let times = Arc::new(Mutex::new(Vec::new()));
        source.add_target(shared(Recorder {
            times: Arc::clone(&times),
        }));

        handle.send_frame(frame(0));
        handle.send_frame(frame(33));
        handle.send_frame(frame(66));
        let report = source.tick();

        assert!(report.uploaded);
        assert_eq!(report.skipped, 2);
        assert_eq!(*times.lock().unwrap(), vec![Timestamp::from_millis(66)]);
        assert_eq!(context.stats().textures_allocated, 1);
    }

    #[test]
    fn test_idle_tick_repeats_latest() {
        let context = Arc::new(HeadlessContext::new());
        let (mut source, handle) = CaptureSource::new(Arc::clone(&context));
        let times = Arc::new(Mutex::new(Vec::new()));
        source.add_target(shared(Recorder {
            times: Arc::clone(&times),
        }));

        assert!(!source.tick().uploaded);
        assert!(times.lock().unwrap().is_empty());

        handle.send_frame(frame(10));
        source.tick();
        source.tick();
        assert_eq!(
            *times.lock().unwrap(),
            vec![Timestamp::from_millis(10), Timestamp::from_millis(10)]
        );
    }

    #[test]
    fn test_late_frame_discarded() {
        let context = Arc::new(HeadlessContext::new());
        let (mut source, handle) = CaptureSource::new(context);
        handle.send_frame(frame(50));
        source.tick();
        handle.send_frame(frame(20));
        let report = source.tick();
        assert!(!report.uploaded);
        assert_eq!(source.latest_time(), Some(Timestamp::from_millis(50)));
        assert_eq!(source.frames_dropped(), 1);
    }

    #[test]
    fn test_audio_forwarded_to_target() {
        let context = Arc::new(HeadlessContext::new());
        let (mut source, handle) = CaptureSource::new(context);
        let counter = Arc::new(AudioCounter::default());
        source.attach_audio_target(counter.clone());
        assert_eq!(counter.enabled.load(Ordering::SeqCst), 1);

        let format = AudioFormat::default();
        for i in 0..3 {
            handle.send_audio(AudioSample::new(vec![0; 64], Timestamp::from_millis(i), format));
        }
        handle.finish_audio();
        let report = source.tick();

        assert_eq!(report.audio, 3);
        assert_eq!(counter.samples.load(Ordering::SeqCst), 3);
        assert_eq!(counter.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_reported() {
        let context = Arc::new(HeadlessContext::new());
        let (mut source, handle) = CaptureSource::new(context);
        drop(handle);
        assert!(source.tick().disconnected);
    }

    #[test]
    fn test_invalid_frame_rejected() {
        let bad = CapturedFrame::rgba(4, 4, vec![0; 8], Timestamp::ZERO);
        assert!(bad.validate().is_err());
        assert!(frame(0).validate().is_ok());
    }
}
