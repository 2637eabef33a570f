// SPDX-License-Identifier: GPL-3.0-only

//! Encoder collaborator of the movie sink
//!
//! A [`MovieWriter`] is pull based: once a stream's data request handler is
//! registered, the writer calls it whenever that stream can take more media.
//! The handler runs on a writer-owned thread and must not block on the GPU.

use crate::graph::Timestamp;
use crate::media::{AudioSample, VideoFrame};
use std::fmt;

/// Elementary stream of a movie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Lifecycle of a writer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriterStatus {
    #[default]
    Unknown,
    Writing,
    Completed,
    Failed(String),
    Cancelled,
}

impl WriterStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, WriterStatus::Failed(_))
    }
}

/// Called when a stream can accept more data
pub type DataRequestHandler = Box<dyn FnMut() + Send + 'static>;

/// Called once the output file is flushed and closed
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// A pull-based audio/video file writer
pub trait MovieWriter: Send + Sync + 'static {
    /// Prepare the output and move to [`WriterStatus::Writing`]
    fn start_writing(&self) -> Result<(), String>;

    /// Anchor the output timeline; media times are relative to `start`
    fn start_session(&self, start: Timestamp);

    fn status(&self) -> WriterStatus;

    /// Add an audio input; only honoured before [`MovieWriter::start_writing`]
    fn enable_audio(&self);

    fn is_ready_for_more_media_data(&self, stream: StreamKind) -> bool;

    /// Register the pull handler for `stream`
    fn request_media_data_when_ready(&self, stream: StreamKind, handler: DataRequestHandler);

    /// Returns false when the writer refused the frame
    fn append_video(&self, frame: VideoFrame) -> bool;

    fn append_audio(&self, sample: AudioSample) -> bool;

    /// No more data will be appended to `stream`
    fn mark_finished(&self, stream: StreamKind);

    /// Finalize asynchronously; `on_complete` runs once the file is closed
    fn finish_writing(&self, on_complete: CompletionHandler);
}
