// SPDX-License-Identifier: MPL-2.0

//! Muxer and file sink for recordings

use crate::errors::RecordingError;
use crate::media::encoders::ContainerFormat;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Muxer feeding the output file
pub struct MuxerConfig {
    pub muxer: gst::Element,
    pub filesink: gst::Element,
    pub output_path: PathBuf,
}

/// Create the container muxer and a filesink at `output_path`
///
/// The path's extension is replaced with the container's.
pub fn create_muxer(
    container: ContainerFormat,
    output_path: &Path,
) -> Result<MuxerConfig, RecordingError> {
    let output_path = output_path.with_extension(container.extension());
    info!(path = %output_path.display(), muxer = container.muxer_name(), "Creating muxer");

    let muxer = gst::ElementFactory::make(container.muxer_name())
        .build()
        .map_err(|e| {
            RecordingError::PipelineError(format!("Failed to create {}: {}", container.muxer_name(), e))
        })?;

    // Non-streamable output gets duration and indexes written for seeking
    if muxer.has_property("streamable") {
        muxer.set_property("streamable", false);
    }

    let location = output_path
        .to_str()
        .ok_or_else(|| RecordingError::PipelineError("Output path is not UTF-8".to_string()))?;
    let filesink = gst::ElementFactory::make("filesink")
        .property("location", location)
        .build()
        .map_err(|e| RecordingError::PipelineError(format!("Failed to create filesink: {}", e)))?;

    Ok(MuxerConfig {
        muxer,
        filesink,
        output_path,
    })
}

/// Link an encoder (through its parser, when present) to the muxer
pub fn link_to_muxer(
    encoder: &gst::Element,
    parser: Option<&gst::Element>,
    muxer: &gst::Element,
) -> Result<(), RecordingError> {
    let last = match parser {
        Some(parser) => {
            encoder.link(parser).map_err(|_| {
                RecordingError::PipelineError("Failed to link encoder to parser".to_string())
            })?;
            parser
        }
        None => encoder,
    };
    last.link(muxer)
        .map_err(|_| RecordingError::PipelineError("Failed to link stream to muxer".to_string()))?;
    debug!(element = %last.name(), "Linked to muxer");
    Ok(())
}

pub fn link_muxer_to_sink(
    muxer: &gst::Element,
    filesink: &gst::Element,
) -> Result<(), RecordingError> {
    muxer
        .link(filesink)
        .map_err(|_| RecordingError::PipelineError("Failed to link muxer to filesink".to_string()))
}
