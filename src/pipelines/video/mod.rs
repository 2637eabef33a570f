// SPDX-License-Identifier: MPL-2.0

//! Movie recording
//!
//! [`MovieSink`] is the terminal graph node: it scales each frame into the
//! movie's resolution, reads it back into a pooled buffer and queues it for
//! a [`MovieWriter`]. [`GstMovieWriter`] is the GStreamer implementation of
//! the writer; it selects the best available encoder (hardware preferred)
//! and muxes audio when enabled.

pub mod encoder_selection;
pub mod gst_writer;
pub mod movie_sink;
pub mod muxer;
pub mod writer;

pub use encoder_selection::{EncoderConfig, SelectedEncoders, select_encoders};
pub use gst_writer::{GstMovieWriter, GstWriterSettings};
pub use movie_sink::{MovieSettings, MovieSink, RecordingControl, RecordingStats, SessionState};
pub use writer::{CompletionHandler, DataRequestHandler, MovieWriter, StreamKind, WriterStatus};
