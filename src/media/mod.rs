// SPDX-License-Identifier: MPL-2.0

//! Media payloads and encoder plumbing
//!
//! - [`samples`]: raw PCM batches and their format
//! - [`pixel_pool`]: pooled CPU buffers holding read-back video frames
//! - [`encoders`]: GStreamer video/audio encoder selection

pub mod encoders;
pub mod pixel_pool;
pub mod samples;

pub use pixel_pool::{PixelBuffer, PixelBufferPool, VideoFrame};
pub use samples::{AudioFormat, AudioSample, SampleFormat};
