// SPDX-License-Identifier: GPL-3.0-only

//! Frame Pipeline - real-time GPU frame graph
//!
//! Frames flow from sources through filter stages into terminal sinks, with
//! every stage running on a GPU execution context.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`gpu`]: the execution context interface, a wgpu backend and a headless backend
//! - [`graph`]: source/consumer traits, fan-out and timestamps
//! - [`filters`]: compute and render filter stages
//! - [`sources`]: still images, live capture, movie files and a test pattern
//! - [`sinks`]: the display sink
//! - [`pipelines`]: the synchronized movie sink and its GStreamer writer
//! - [`media`]: pixel buffer pool, audio samples and encoder discovery
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```ignore
//! let context = Arc::new(WgpuContext::new(DevicePreference::LowPower)?);
//! let (mut camera, handle) = CaptureSource::new(Arc::clone(&context));
//! let filter = shared(grayscale(Arc::clone(&context)));
//! let sink = shared(MovieSink::new(context, writer, MovieSettings::default())?);
//! filter.lock().unwrap().add_target(sink.clone());
//! camera.add_target(filter);
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod filters;
pub mod gpu;
pub mod graph;
pub mod handoff_queue;
pub mod media;
pub mod pipelines;
pub mod shaders;
pub mod sinks;
pub mod sources;

// Re-export commonly used types
pub use config::Config;
pub use constants::{BackpressurePolicy, BitratePreset, DevicePreference};
pub use errors::{AppError, AppResult, GpuError, RecordingError, SourceError};
pub use filters::{FillMode, Filter, FilterKind, TextureRotation};
pub use gpu::{GpuContext, HeadlessContext, WgpuContext};
pub use graph::{FrameConsumer, FrameSource, Timestamp, shared};
pub use handoff_queue::HandoffQueue;
pub use pipelines::video::{GstMovieWriter, MovieSink, MovieWriter, RecordingControl};
