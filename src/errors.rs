// SPDX-License-Identifier: MPL-2.0

//! Error types for the frame pipeline
//!
//! Nothing here crosses a graph tick: nodes log and contain their failures.
//! These types surface from construction, configuration and the CLI.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// GPU execution context errors
    Gpu(GpuError),
    /// Recording-related errors
    Recording(RecordingError),
    /// Frame source errors
    Source(SourceError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Errors raised by an execution context
#[derive(Debug, Clone, PartialEq)]
pub enum GpuError {
    /// No adapter matched the requested options
    NoAdapter(String),
    /// Device or queue could not be created
    DeviceCreation(String),
    /// No program is registered under this name
    ProgramNotFound(String),
    /// The program exists but its pipeline failed validation
    PipelineCreation(String),
    /// Texture allocation failed
    TextureAllocation(String),
    /// Buffer allocation failed
    BufferAllocation(String),
    /// Submitting or waiting for a command buffer failed
    Submission(String),
    /// Reading a texture back to CPU memory failed
    Readback(String),
    /// Zero-sized or mismatched dimensions
    InvalidDimensions { width: u32, height: u32 },
}

/// Recording-specific errors
#[derive(Debug, Clone)]
pub enum RecordingError {
    /// Failed to start recording
    StartFailed(String),
    /// Encoder not available
    EncoderNotAvailable(String),
    /// Pipeline error during recording
    PipelineError(String),
    /// The writer reported a terminal failure
    WriterFailed(String),
    /// Sink resources could not be created on the GPU
    Gpu(GpuError),
}

/// Frame source errors
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Static image could not be read or decoded
    ImageLoad(String),
    /// Movie file could not be opened or decoded
    Decode(String),
    /// Frame payload does not match its declared geometry
    InvalidFrame(String),
    /// Source texture could not be created
    Gpu(GpuError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Gpu(e) => write!(f, "GPU error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Source(e) => write!(f, "Source error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter(msg) => write!(f, "No suitable GPU adapter: {}", msg),
            GpuError::DeviceCreation(msg) => write!(f, "Failed to create GPU device: {}", msg),
            GpuError::ProgramNotFound(name) => write!(f, "GPU program not found: {}", name),
            GpuError::PipelineCreation(msg) => write!(f, "Pipeline creation failed: {}", msg),
            GpuError::TextureAllocation(msg) => write!(f, "Texture allocation failed: {}", msg),
            GpuError::BufferAllocation(msg) => write!(f, "Buffer allocation failed: {}", msg),
            GpuError::Submission(msg) => write!(f, "Command submission failed: {}", msg),
            GpuError::Readback(msg) => write!(f, "Texture readback failed: {}", msg),
            GpuError::InvalidDimensions { width, height } => {
                write!(f, "Invalid dimensions {}x{}", width, height)
            }
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::StartFailed(msg) => write!(f, "Failed to start recording: {}", msg),
            RecordingError::EncoderNotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            RecordingError::PipelineError(msg) => write!(f, "Pipeline error: {}", msg),
            RecordingError::WriterFailed(msg) => write!(f, "Writer failed: {}", msg),
            RecordingError::Gpu(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::ImageLoad(msg) => write!(f, "Failed to load image: {}", msg),
            SourceError::Decode(msg) => write!(f, "Decode failed: {}", msg),
            SourceError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            SourceError::Gpu(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for GpuError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for SourceError {}

impl From<GpuError> for AppError {
    fn from(err: GpuError) -> Self {
        AppError::Gpu(err)
    }
}

impl From<RecordingError> for AppError {
    fn from(err: RecordingError) -> Self {
        AppError::Recording(err)
    }
}

impl From<SourceError> for AppError {
    fn from(err: SourceError) -> Self {
        AppError::Source(err)
    }
}

impl From<GpuError> for RecordingError {
    fn from(err: GpuError) -> Self {
        RecordingError::Gpu(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<GpuError> for SourceError {
    fn from(err: GpuError) -> Self {
        SourceError::Gpu(err)
    }
}

impl From<image::ImageError> for SourceError {
    fn from(err: image::ImageError) -> Self {
        SourceError::ImageLoad(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_display() {
        let err: AppError = RecordingError::Gpu(GpuError::ProgramNotFound("sepia".into())).into();
        assert_eq!(
            err.to_string(),
            "Recording error: GPU program not found: sepia"
        );
    }

    #[test]
    fn test_invalid_dimensions_display() {
        let err = GpuError::InvalidDimensions {
            width: 0,
            height: 720,
        };
        assert_eq!(err.to_string(), "Invalid dimensions 0x720");
    }
}
