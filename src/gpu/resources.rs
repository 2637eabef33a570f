// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU resource helpers
//!
//! - Dimension caching for lazily allocated textures
//! - Async buffer readback
//! - Dispatch and row-pitch arithmetic

use super::{GpuContext, GpuTexture, PixelFormat};
use crate::errors::GpuError;
use tracing::debug;

/// Cached resource dimensions - avoids reallocation when dimensions match
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if dimensions have changed and need update
    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }

    pub fn update(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Check if dimensions are initialized (non-zero)
    pub fn is_initialized(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Lazily allocated texture owned by one node
///
/// The texture is created on the first [`TextureSlot::ensure`] call, sized to
/// the requested dimensions, and reused while those dimensions stay the same.
/// A dimension change allocates a fresh texture; an existing texture is never
/// resized in place.
pub struct TextureSlot<C: GpuContext> {
    texture: Option<C::Texture>,
    dims: CachedDimensions,
    format: PixelFormat,
}

impl<C: GpuContext> TextureSlot<C> {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            texture: None,
            dims: CachedDimensions::default(),
            format,
        }
    }

    /// Return the texture for `width`x`height`, allocating it if needed
    pub fn ensure(
        &mut self,
        context: &C,
        width: u32,
        height: u32,
    ) -> Result<&C::Texture, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions { width, height });
        }

        if self.texture.is_none() || self.dims.needs_update(width, height) {
            // Forget the old texture first so a failed allocation leaves the slot empty
            self.texture = None;
            let texture = context.allocate_texture(width, height, self.format)?;
            debug!(width, height, "Output texture allocated");
            self.dims.update(width, height);
            self.texture = Some(texture);
        }

        self.texture
            .as_ref()
            .ok_or_else(|| GpuError::TextureAllocation("output texture missing".into()))
    }

    pub fn get(&self) -> Option<&C::Texture> {
        self.texture.as_ref()
    }

    /// Drop the texture; the next `ensure` allocates again
    pub fn invalidate(&mut self) {
        self.texture = None;
        self.dims = CachedDimensions::default();
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.texture.as_ref().map(|t| t.size())
    }
}

/// Helper for async buffer readback (map, poll, read, unmap)
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, GpuError> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| GpuError::Readback("Failed to receive buffer mapping".into()))?
        .map_err(|e| GpuError::Readback(format!("Failed to map buffer: {:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Number of whole threadgroups along one dimension
///
/// Remainder pixels past the last whole tile are not covered.
#[inline]
pub fn threadgroup_count(dimension: u32, tile: u32) -> u32 {
    dimension / tile
}

/// Row pitch padded to wgpu's copy alignment (256 bytes)
#[inline]
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;

    #[test]
    fn test_cached_dimensions() {
        let mut dims = CachedDimensions::default();
        assert!(!dims.is_initialized());
        assert!(dims.needs_update(640, 480));

        dims.update(640, 480);
        assert!(dims.is_initialized());
        assert!(!dims.needs_update(640, 480));
        assert!(dims.needs_update(1280, 720));
    }

    #[test]
    fn test_threadgroup_count_floors() {
        assert_eq!(threadgroup_count(640, 8), 80);
        assert_eq!(threadgroup_count(645, 8), 80);
        assert_eq!(threadgroup_count(7, 8), 0);
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1920), 7680);
    }

    #[test]
    fn test_slot_reallocates_only_on_resize() {
        let context = HeadlessContext::new();
        let mut slot: TextureSlot<HeadlessContext> = TextureSlot::new(PixelFormat::Rgba8Unorm);

        let first = slot.ensure(&context, 64, 32).unwrap().id();
        let again = slot.ensure(&context, 64, 32).unwrap().id();
        assert_eq!(first, again);
        assert_eq!(context.stats().textures_allocated, 1);

        let resized = slot.ensure(&context, 32, 32).unwrap().id();
        assert_ne!(first, resized);
        assert_eq!(context.stats().textures_allocated, 2);

        slot.invalidate();
        assert!(slot.get().is_none());
        assert!(slot.ensure(&context, 0, 32).is_err());
    }
}
