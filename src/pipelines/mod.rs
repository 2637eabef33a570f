// SPDX-License-Identifier: MPL-2.0

//! Output pipelines
//!
//! - [`video`]: movie recording with GStreamer and hardware acceleration

pub mod video;
