// SPDX-License-Identifier: GPL-3.0-only

//! Bundled GPU programs
//!
//! All programs operate on RGBA8 textures. Compute programs read the input at
//! binding 0 and write the output storage texture at binding 1; render programs
//! sample the input at binding 0 with a sampler at binding 1. Extra bindings
//! supplied by a filter's configuration start at binding 2.

mod library;

pub use library::{
    BASIC_FRAGMENT, BASIC_VERTEX, GRAYSCALE_COMPUTE, PASSTHROUGH_COMPUTE, ProgramLibrary,
    SEPIA_COMPUTE, ShaderFunction, ShaderStage,
};
