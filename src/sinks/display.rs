// SPDX-License-Identifier: GPL-3.0-only

//! On-screen sink
//!
//! Draws each frame into the next drawable of a [`PresentationSurface`],
//! scaled by the configured fill mode, then presents it. Commits are fire
//! and forget; the display never waits on the GPU.

use crate::constants::graph::{CLEAR_COLOR, OFFSCREEN_DRAWABLES, QUAD_INDEX_COUNT};
use crate::errors::GpuError;
use crate::filters::{FillMode, QUAD_INDICES, QUAD_VERTICES, TextureRotation};
use crate::gpu::{
    Bindings, BufferUsage, CachedDimensions, CommandBuffer, GpuContext, GpuTexture, LoadAction,
    PixelFormat, RenderPass,
};
use crate::graph::{FrameConsumer, Timestamp};
use crate::shaders::{BASIC_FRAGMENT, BASIC_VERTEX};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Where a [`DisplaySink`] draws
pub trait PresentationSurface<C: GpuContext>: Send {
    /// Drawable size in pixels
    fn size(&self) -> (u32, u32);

    /// Texture to draw the next frame into, `None` when none is free
    fn next_drawable(&mut self) -> Option<C::Texture>;

    /// Show a drawable returned by [`PresentationSurface::next_drawable`]
    fn present(&mut self, drawable: C::Texture, time: Timestamp);
}

/// In-memory surface cycling through a small set of drawables
pub struct OffscreenSurface<C: GpuContext> {
    context: Arc<C>,
    width: u32,
    height: u32,
    drawables: Vec<C::Texture>,
    next: usize,
    presented: Option<(C::Texture, Timestamp)>,
    presented_count: u64,
}

impl<C: GpuContext> OffscreenSurface<C> {
    pub fn new(context: Arc<C>, width: u32, height: u32) -> Self {
        Self {
            context,
            width,
            height,
            drawables: Vec::new(),
            next: 0,
            presented: None,
            presented_count: 0,
        }
    }

    /// Change the drawable size; existing drawables are released
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.drawables.clear();
            self.next = 0;
        }
    }

    /// Most recently presented drawable and its frame time
    pub fn last_presented(&self) -> Option<&(C::Texture, Timestamp)> {
        self.presented.as_ref()
    }

    pub fn presented_count(&self) -> u64 {
        self.presented_count
    }
}

impl<C: GpuContext> PresentationSurface<C> for OffscreenSurface<C> {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_drawable(&mut self) -> Option<C::Texture> {
        if self.drawables.len() < OFFSCREEN_DRAWABLES {
            match self
                .context
                .allocate_texture(self.width, self.height, PixelFormat::Rgba8Unorm)
            {
                Ok(texture) => {
                    self.drawables.push(texture.clone());
                    return Some(texture);
                }
                Err(e) => {
                    error!(error = %e, "Offscreen drawable allocation failed");
                    return None;
                }
            }
        }
        let drawable = self.drawables.get(self.next).cloned();
        self.next = (self.next + 1) % self.drawables.len().max(1);
        drawable
    }

    fn present(&mut self, drawable: C::Texture, time: Timestamp) {
        self.presented = Some((drawable, time));
        self.presented_count += 1;
    }
}

/// Terminal node presenting frames on a surface
pub struct DisplaySink<C: GpuContext, S: PresentationSurface<C>> {
    context: Arc<C>,
    surface: S,
    program: C::Program,
    positions: C::Buffer,
    tex_coords: C::Buffer,
    indices: C::Buffer,
    fill_mode: FillMode,
    input_dims: CachedDimensions,
    drawable_dims: CachedDimensions,
    frames_presented: u64,
    frames_skipped: u64,
}

impl<C: GpuContext, S: PresentationSurface<C>> DisplaySink<C, S> {
    pub fn new(context: Arc<C>, surface: S, fill_mode: FillMode) -> Result<Self, GpuError> {
        let program = context.resolve_render_program(BASIC_VERTEX, BASIC_FRAGMENT)?;
        let positions =
            context.allocate_buffer_from("display_positions", &QUAD_VERTICES, BufferUsage::Vertex)?;
        let tex_coords = context.allocate_buffer_from(
            "display_tex_coords",
            &TextureRotation::None.tex_coords(),
            BufferUsage::Vertex,
        )?;
        let indices =
            context.allocate_buffer_from("display_indices", &QUAD_INDICES, BufferUsage::Index)?;

        info!(?fill_mode, size = ?surface.size(), "Display sink created");

        Ok(Self {
            context,
            surface,
            program,
            positions,
            tex_coords,
            indices,
            fill_mode,
            input_dims: CachedDimensions::default(),
            drawable_dims: CachedDimensions::default(),
            frames_presented: 0,
            frames_skipped: 0,
        })
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn fill_mode(&self) -> FillMode {
        self.fill_mode
    }

    pub fn set_fill_mode(&mut self, fill_mode: FillMode) {
        if fill_mode != self.fill_mode {
            self.fill_mode = fill_mode;
            // Force a geometry update on the next frame
            self.input_dims = CachedDimensions::default();
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Frames committed without a drawable to show them in
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    fn update_geometry(&mut self, input: (u32, u32), drawable: (u32, u32)) {
        if !self.input_dims.needs_update(input.0, input.1)
            && !self.drawable_dims.needs_update(drawable.0, drawable.1)
        {
            return;
        }
        self.input_dims.update(input.0, input.1);
        self.drawable_dims.update(drawable.0, drawable.1);

        let vertices = self.fill_mode.convert(&QUAD_VERTICES, input, drawable);
        self.context
            .write_buffer(&self.positions, bytemuck::cast_slice(&vertices));
        debug!(?input, ?drawable, ?vertices, "Display geometry updated");
    }
}

impl<C: GpuContext, S: PresentationSurface<C>> FrameConsumer<C> for DisplaySink<C, S> {
    fn new_frame_ready(
        &mut self,
        input: C::Texture,
        time: Timestamp,
        mut command_buffer: C::CommandBuffer,
    ) {
        let Some(drawable) = self.surface.next_drawable() else {
            trace!(time = %time, "No drawable, committing upstream work only");
            self.frames_skipped += 1;
            command_buffer.commit();
            return;
        };

        self.update_geometry(input.size(), drawable.size());

        command_buffer.encode_render(&RenderPass {
            label: "display_sink",
            program: &self.program,
            target: &drawable,
            load: LoadAction::Clear,
            clear_color: CLEAR_COLOR,
            positions: &self.positions,
            tex_coords: &self.tex_coords,
            indices: &self.indices,
            index_count: QUAD_INDEX_COUNT,
            input: &input,
            extra: Bindings::new(2),
        });
        command_buffer.commit();

        self.surface.present(drawable, time);
        self.frames_presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;
    use crate::gpu::headless::EncodedPass;

    struct NoDrawables;

    impl PresentationSurface<HeadlessContext> for NoDrawables {
        fn size(&self) -> (u32, u32) {
            (4, 4)
        }
        fn next_drawable(&mut self) -> Option<<HeadlessContext as GpuContext>::Texture> {
            None
        }
        fn present(&mut self, _: <HeadlessContext as GpuContext>::Texture, _: Timestamp) {
            panic!("nothing to present");
        }
    }

    fn input(context: &HeadlessContext, width: u32, height: u32) -> <HeadlessContext as GpuContext>::Texture {
        let pixels = vec![200; (width * height * 4) as usize];
        context
            .upload_texture(width, height, PixelFormat::Rgba8Unorm, &pixels, width * 4)
            .unwrap()
    }

    #[test]
    fn test_presents_with_clear() {
        let context = Arc::new(HeadlessContext::new());
        let surface = OffscreenSurface::new(Arc::clone(&context), 8, 8);
        let mut sink = DisplaySink::new(Arc::clone(&context), surface, FillMode::AspectFit).unwrap();

        let frame = input(&context, 8, 8);
        sink.new_frame_ready(frame, Timestamp::from_millis(5), context.new_command_buffer());

        assert_eq!(sink.frames_presented(), 1);
        let (drawable, time) = sink.surface().last_presented().unwrap();
        assert_eq!(*time, Timestamp::from_millis(5));
        assert_eq!(drawable.pixels()[..4], [200, 200, 200, 200]);

        let committed = context.committed();
        assert_eq!(committed.len(), 1);
        assert!(!committed[0].waited);
        match &committed[0].passes[..] {
            [EncodedPass::Render { load, .. }] => assert_eq!(*load, LoadAction::Clear),
            other => panic!("unexpected passes {:?}", other),
        }
    }

    #[test]
    fn test_commits_without_drawable() {
        let context = Arc::new(HeadlessContext::new());
        let mut sink = DisplaySink::new(Arc::clone(&context), NoDrawables, FillMode::Stretch).unwrap();
        sink.new_frame_ready(input(&context, 4, 4), Timestamp::ZERO, context.new_command_buffer());
        assert_eq!(sink.frames_skipped(), 1);
        assert_eq!(context.stats().commits, 1);
    }

    #[test]
    fn test_offscreen_cycles_drawables() {
        let context = Arc::new(HeadlessContext::new());
        let mut surface = OffscreenSurface::new(Arc::clone(&context), 4, 4);
        let ids: Vec<u64> = (0..4)
            .map(|_| surface.next_drawable().unwrap().id())
            .collect();
        assert_eq!(ids[0], ids[2]);
        assert_eq!(ids[1], ids[3]);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(context.stats().textures_allocated, OFFSCREEN_DRAWABLES as u64);
    }
}
