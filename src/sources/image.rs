// SPDX-License-Identifier: GPL-3.0-only

//! Still image source

use crate::errors::SourceError;
use crate::gpu::{GpuContext, GpuTexture, PixelFormat};
use crate::graph::{FrameSource, Targets, Timestamp};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// An image uploaded once and dispatched on every [`StaticImage::process`]
pub struct StaticImage<C: GpuContext> {
    context: Arc<C>,
    texture: C::Texture,
    targets: Targets<C>,
}

impl<C: GpuContext> StaticImage<C> {
    /// Load PNG, JPEG, WebP and the other formats the image crate reads
    pub fn open(context: Arc<C>, path: &Path) -> Result<Self, SourceError> {
        info!(path = %path.display(), "Loading image file");

        let img = ::image::open(path).map_err(|e| {
            SourceError::ImageLoad(format!("'{}': {}", path.display(), e))
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba(context, width, height, &rgba.into_raw())
    }

    /// Tightly packed RGBA pixels
    pub fn from_rgba(
        context: Arc<C>,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self, SourceError> {
        if pixels.len() < width as usize * height as usize * 4 {
            return Err(SourceError::InvalidFrame(format!(
                "{} bytes for {}x{} RGBA",
                pixels.len(),
                width,
                height
            )));
        }
        let texture =
            context.upload_texture(width, height, PixelFormat::Rgba8Unorm, pixels, width * 4)?;
        info!(width, height, "Image uploaded");

        Ok(Self {
            context,
            texture,
            targets: Targets::new(),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        self.texture.size()
    }

    pub fn texture(&self) -> &C::Texture {
        &self.texture
    }

    /// Dispatch the image to every target, each on its own command buffer
    pub fn process(&self, time: Timestamp) {
        self.targets.broadcast(&self.context, &self.texture, time);
    }
}

impl<C: GpuContext> FrameSource<C> for StaticImage<C> {
    fn targets(&self) -> &Targets<C> {
        &self.targets
    }

    fn targets_mut(&mut self) -> &mut Targets<C> {
        &mut self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;

    #[test]
    fn test_short_payload_rejected() {
        let context = Arc::new(HeadlessContext::new());
        let result = StaticImage::from_rgba(context, 4, 4, &[0; 15]);
        assert!(matches!(result, Err(SourceError::InvalidFrame(_))));
    }

    #[test]
    fn test_missing_file() {
        let context = Arc::new(HeadlessContext::new());
        let result = StaticImage::open(context, Path::new("/nonexistent/frame.png"));
        assert!(matches!(result, Err(SourceError::ImageLoad(_))));
    }

    #[test]
    fn test_upload_once() {
        let context = Arc::new(HeadlessContext::new());
        let image = StaticImage::from_rgba(Arc::clone(&context), 2, 2, &[7; 16]).unwrap();
        image.process(Timestamp::ZERO);
        image.process(Timestamp::from_millis(33));
        assert_eq!(image.size(), (2, 2));
        assert_eq!(context.stats().textures_allocated, 1);
        assert_eq!(image.texture().pixels(), vec![7; 16]);
    }
}
