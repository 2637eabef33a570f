// SPDX-License-Identifier: GPL-3.0-only

//! Terminal graph nodes other than the movie sink

pub mod display;

pub use display::{DisplaySink, OffscreenSurface, PresentationSurface};
