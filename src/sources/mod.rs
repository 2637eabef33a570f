// SPDX-License-Identifier: GPL-3.0-only

//! Frame sources
//!
//! - [`StaticImage`]: one uploaded image, dispatched on demand
//! - [`CaptureSource`]: frames and audio pushed by a producer thread through
//!   a [`CaptureHandle`], dispatched on a display-link tick
//! - [`MovieFileSource`]: a decoded movie file feeding a capture source
//! - [`TestPattern`]: generated colour bars and tone

pub mod capture;
pub mod image;
pub mod movie_file;
pub mod test_pattern;

pub use capture::{CaptureHandle, CaptureSource, CapturedFrame, spawn_display_link};
pub use image::StaticImage;
pub use movie_file::{MovieFileSource, PlaybackMode};
pub use test_pattern::TestPattern;

use crate::media::AudioSample;

/// Receiver of a source's audio
///
/// A source that produces audio holds one of these and forwards every
/// sample in arrival order.
pub trait AudioEncodingTarget: Send + Sync {
    /// Called once when the target is attached to a source
    fn enable_audio(&self);

    fn process_audio(&self, sample: AudioSample);

    /// The source will produce no more audio
    fn finish_audio(&self) {}
}
