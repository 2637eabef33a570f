// SPDX-License-Identifier: GPL-3.0-only

//! Bundled filters

use super::{Filter, FilterConfigurator, FilterKind, TextureRotation};
use crate::gpu::{Bindings, BufferUsage, GpuContext};
use crate::shaders::{
    BASIC_FRAGMENT, BASIC_VERTEX, GRAYSCALE_COMPUTE, PASSTHROUGH_COMPUTE, SEPIA_COMPUTE,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error};

/// Luminance grayscale (Rec. 709 weights)
pub fn grayscale<C: GpuContext>(context: Arc<C>) -> Filter<C> {
    Filter::new(context, "grayscale", FilterKind::compute(GRAYSCALE_COMPUTE))
}

/// Compute copy of the input
pub fn copy<C: GpuContext>(context: Arc<C>) -> Filter<C> {
    Filter::new(context, "copy", FilterKind::compute(PASSTHROUGH_COMPUTE))
}

/// Draws the input through the quad, optionally rotated or flipped
pub fn passthrough<C: GpuContext>(context: Arc<C>, rotation: TextureRotation) -> Filter<C> {
    Filter::new(
        context,
        "passthrough",
        FilterKind::render(BASIC_VERTEX, BASIC_FRAGMENT, rotation),
    )
}

/// Sepia tone blended with the source by `intensity` (0.0 to 1.0)
///
/// The returned handle changes the intensity while the graph runs; the new
/// value is uploaded before the next dispatch.
pub fn sepia<C: GpuContext>(context: Arc<C>, intensity: f32) -> (Filter<C>, IntensityHandle) {
    let handle = IntensityHandle::new(intensity);
    let kind = FilterKind::compute(SEPIA_COMPUTE);

    match SepiaParams::new(&*context, handle.clone()) {
        Ok(params) => (
            Filter::with_configurator(context, "sepia", kind, params),
            handle,
        ),
        Err(e) => {
            error!(error = %e, "Sepia parameters unavailable, stage disabled");
            let mut filter = Filter::new(context, "sepia", kind);
            filter.disable();
            (filter, handle)
        }
    }
}

/// Shared, lock-free filter intensity
#[derive(Debug, Clone)]
pub struct IntensityHandle(Arc<AtomicU32>);

impl IntensityHandle {
    fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.clamp(0.0, 1.0).to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Set the intensity, clamped to 0.0..=1.0
    pub fn set(&self, value: f32) {
        self.0.store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

/// Uniform layout of the sepia program (binding 2)
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SepiaUniform {
    intensity: f32,
    _pad: [f32; 3],
}

impl SepiaUniform {
    fn new(intensity: f32) -> Self {
        Self {
            intensity,
            _pad: [0.0; 3],
        }
    }
}

/// Binds the sepia uniform, re-uploading it when the intensity changes
pub struct SepiaParams<C: GpuContext> {
    buffer: C::Buffer,
    intensity: IntensityHandle,
    uploaded: AtomicU32,
}

impl<C: GpuContext> SepiaParams<C> {
    pub fn new(
        context: &C,
        intensity: IntensityHandle,
    ) -> Result<Self, crate::errors::GpuError> {
        let value = intensity.get();
        let buffer = context.allocate_buffer_from(
            "sepia_params",
            &[SepiaUniform::new(value)],
            BufferUsage::Uniform,
        )?;
        Ok(Self {
            buffer,
            intensity,
            uploaded: AtomicU32::new(value.to_bits()),
        })
    }
}

impl<C: GpuContext> FilterConfigurator<C> for SepiaParams<C> {
    fn configure_compute<'a>(&'a self, context: &C, bindings: &mut Bindings<'a, C>) {
        let current = self.intensity.get().to_bits();
        if self.uploaded.swap(current, Ordering::Relaxed) != current {
            let value = f32::from_bits(current);
            debug!(intensity = value, "Uploading sepia intensity");
            context.write_buffer(
                &self.buffer,
                bytemuck::bytes_of(&SepiaUniform::new(value)),
            );
        }
        bindings.set_buffer(2, &self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::EncodedPass;
    use crate::gpu::{GpuTexture, HeadlessContext, PixelFormat};
    use crate::graph::{FrameConsumer, FrameSource, Timestamp, shared};

    struct Commit;

    impl FrameConsumer<HeadlessContext> for Commit {
        fn new_frame_ready(
            &mut self,
            _input: <HeadlessContext as GpuContext>::Texture,
            _time: Timestamp,
            command_buffer: <HeadlessContext as GpuContext>::CommandBuffer,
        ) {
            use crate::gpu::CommandBuffer;
            command_buffer.commit();
        }
    }

    fn sepia_intensity(pass: &EncodedPass) -> f32 {
        match pass {
            EncodedPass::Compute { extra_buffers, .. } => {
                let (slot, bytes) = &extra_buffers[0];
                assert_eq!(*slot, 2);
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            other => panic!("unexpected pass {:?}", other),
        }
    }

    #[test]
    fn test_intensity_clamped() {
        let handle = IntensityHandle::new(3.0);
        assert_eq!(handle.get(), 1.0);
        handle.set(-1.0);
        assert_eq!(handle.get(), 0.0);
    }

    #[test]
    fn test_sepia_uploads_changed_intensity() {
        let context = Arc::new(HeadlessContext::new());
        let (mut filter, handle) = sepia(Arc::clone(&context), 0.5);
        assert!(filter.is_configured());
        filter.add_target(shared(Commit));

        let input = context
            .allocate_texture(8, 8, PixelFormat::Rgba8Unorm)
            .unwrap();
        filter.new_frame_ready(input.clone(), Timestamp::ZERO, context.new_command_buffer());
        handle.set(0.25);
        filter.new_frame_ready(input, Timestamp::from_millis(33), context.new_command_buffer());

        let committed = context.committed();
        assert_eq!(sepia_intensity(&committed[0].passes[0]), 0.5);
        assert_eq!(sepia_intensity(&committed[1].passes[0]), 0.25);
    }

    #[test]
    fn test_grayscale_output_is_gray() {
        let context = Arc::new(HeadlessContext::new());
        let mut filter = grayscale(Arc::clone(&context));
        filter.add_target(shared(Commit));

        let pixels: Vec<u8> = [200u8, 40, 10, 255].repeat(64);
        let input = context
            .upload_texture(8, 8, PixelFormat::Rgba8Unorm, &pixels, 32)
            .unwrap();
        filter.new_frame_ready(input, Timestamp::ZERO, context.new_command_buffer());

        let output = filter.output_texture().unwrap();
        assert_eq!(output.size(), (8, 8));
        let out = output.pixels();
        assert_eq!(out[0], out[1]);
        assert_eq!(out[1], out[2]);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn test_passthrough_is_render_kind() {
        let context = Arc::new(HeadlessContext::new());
        let filter = passthrough(context, TextureRotation::Left);
        assert!(matches!(
            filter.kind(),
            FilterKind::Render {
                rotation: TextureRotation::Left,
                ..
            }
        ));
    }
}
