// SPDX-License-Identifier: GPL-3.0-only

//! GPU execution context
//!
//! Frame graph nodes never touch a device directly. They see a narrow
//! capability interface: resolve named programs, allocate textures and
//! buffers, and obtain command buffers into which they encode compute or
//! render passes. A context is constructed explicitly and shared as
//! `Arc<C>`; there is no process-wide device.
//!
//! Two contexts ship with the crate:
//! - [`WgpuContext`] runs on a real adapter through wgpu.
//! - [`HeadlessContext`] records what was asked of it without a GPU.

pub mod headless;
mod resources;
pub mod wgpu_context;

pub use headless::HeadlessContext;
pub use resources::{
    CachedDimensions, TextureSlot, padded_bytes_per_row, read_buffer_async, threadgroup_count,
};
pub use wgpu_context::{GpuDeviceInfo, WgpuContext};

use crate::errors::GpuError;
use std::fmt;
use tracing::warn;

/// Pixel layout of a texture
///
/// Every texture produced by the graph uses [`PixelFormat::Rgba8Unorm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }
}

/// What a buffer will be bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

/// How a render target's previous contents are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    /// Contents are overwritten; nothing from the previous frame is kept
    DontCare,
    /// Cleared to the pass's clear colour before drawing
    Clear,
}

/// Cache key of a resolved program
///
/// Compute programs are keyed by function name, render programs by their
/// vertex and fragment pair; the two never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgramKey {
    Compute(String),
    Render(String, String),
}

impl ProgramKey {
    pub fn render(vertex: &str, fragment: &str) -> Self {
        ProgramKey::Render(vertex.to_string(), fragment.to_string())
    }
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramKey::Compute(name) => write!(f, "{}", name),
            ProgramKey::Render(vertex, fragment) => write!(f, "{}+{}", vertex, fragment),
        }
    }
}

/// A 2D surface owned by an execution context
///
/// Clones are cheap and refer to the same GPU surface.
pub trait GpuTexture: Clone + Send + Sync + fmt::Debug + 'static {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> PixelFormat;

    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

/// Additional resources bound by a filter's configuration
///
/// Slots below `first_free_slot` belong to the pipeline (input/output
/// textures, sampler) and are refused.
pub struct Bindings<'a, C: GpuContext> {
    first_free_slot: u32,
    textures: Vec<(u32, &'a C::Texture)>,
    buffers: Vec<(u32, &'a C::Buffer)>,
}

impl<'a, C: GpuContext> Bindings<'a, C> {
    pub fn new(first_free_slot: u32) -> Self {
        Self {
            first_free_slot,
            textures: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn set_texture(&mut self, slot: u32, texture: &'a C::Texture) {
        if self.accepts(slot) {
            self.textures.retain(|(s, _)| *s != slot);
            self.textures.push((slot, texture));
        }
    }

    pub fn set_buffer(&mut self, slot: u32, buffer: &'a C::Buffer) {
        if self.accepts(slot) {
            self.buffers.retain(|(s, _)| *s != slot);
            self.buffers.push((slot, buffer));
        }
    }

    pub fn textures(&self) -> &[(u32, &'a C::Texture)] {
        &self.textures
    }

    pub fn buffers(&self) -> &[(u32, &'a C::Buffer)] {
        &self.buffers
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty()
    }

    fn accepts(&self, slot: u32) -> bool {
        if slot < self.first_free_slot {
            warn!(
                slot,
                first_free_slot = self.first_free_slot,
                "Ignoring binding on a reserved slot"
            );
            return false;
        }
        true
    }
}

/// One compute dispatch
///
/// The input texture is bound at slot 0 and the output at slot 1.
pub struct ComputePass<'a, C: GpuContext> {
    pub label: &'a str,
    pub program: &'a C::Program,
    pub input: &'a C::Texture,
    pub output: &'a C::Texture,
    pub extra: Bindings<'a, C>,
    pub threadgroups: [u32; 3],
    pub threads_per_threadgroup: [u32; 3],
}

/// One indexed draw into `target`
///
/// Vertex attribute 0 reads `positions`, attribute 1 reads `tex_coords`,
/// and the fragment stage samples `input` at slot 0.
pub struct RenderPass<'a, C: GpuContext> {
    pub label: &'a str,
    pub program: &'a C::Program,
    pub target: &'a C::Texture,
    pub load: LoadAction,
    pub clear_color: [f64; 4],
    pub positions: &'a C::Buffer,
    pub tex_coords: &'a C::Buffer,
    pub indices: &'a C::Buffer,
    pub index_count: u32,
    pub input: &'a C::Texture,
    pub extra: Bindings<'a, C>,
}

/// A unit of GPU submission work
///
/// Passes are encoded in call order. Dropping a buffer without committing
/// discards its work.
pub trait CommandBuffer<C: GpuContext>: Send + 'static {
    fn encode_compute(&mut self, pass: &ComputePass<'_, C>);

    fn encode_render(&mut self, pass: &RenderPass<'_, C>);

    /// Submit without waiting for completion
    fn commit(self);

    /// Submit and block the calling thread until the GPU has finished
    fn commit_and_wait(self) -> Result<(), GpuError>;
}

/// Capabilities the frame graph needs from a GPU device
pub trait GpuContext: Send + Sync + Sized + 'static {
    type Texture: GpuTexture;
    type Buffer: Send + Sync + 'static;
    type Program: Clone + Send + Sync + 'static;
    type CommandBuffer: CommandBuffer<Self>;

    /// Resolve a compute program by function name (memoized)
    fn resolve_compute_program(&self, name: &str) -> Result<Self::Program, GpuError>;

    /// Resolve a render program from a vertex and a fragment function (memoized by the pair)
    fn resolve_render_program(
        &self,
        vertex: &str,
        fragment: &str,
    ) -> Result<Self::Program, GpuError>;

    fn allocate_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self::Texture, GpuError>;

    /// Copy CPU pixels into an existing texture of matching size
    fn write_texture(
        &self,
        texture: &Self::Texture,
        pixels: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GpuError>;

    fn allocate_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<Self::Buffer, GpuError>;

    /// Overwrite a buffer's contents; takes effect before the next commit
    fn write_buffer(&self, buffer: &Self::Buffer, contents: &[u8]);

    fn new_command_buffer(&self) -> Self::CommandBuffer;

    /// Read a texture into `dst` with rows `bytes_per_row` apart
    ///
    /// Callers must have waited for the work that produced the texture.
    fn read_texture(
        &self,
        texture: &Self::Texture,
        dst: &mut [u8],
        bytes_per_row: usize,
    ) -> Result<(), GpuError>;

    /// Allocate a GPU-visible buffer from a typed array
    fn allocate_buffer_from<T: bytemuck::Pod>(
        &self,
        label: &str,
        data: &[T],
        usage: BufferUsage,
    ) -> Result<Self::Buffer, GpuError> {
        self.allocate_buffer(label, bytemuck::cast_slice(data), usage)
    }

    /// Allocate a texture and fill it from CPU pixels
    fn upload_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
        bytes_per_row: u32,
    ) -> Result<Self::Texture, GpuError> {
        let texture = self.allocate_texture(width, height, format)?;
        self.write_texture(&texture, pixels, bytes_per_row)?;
        Ok(texture)
    }
}

/// Check a CPU pixel payload covers `height` rows of `bytes_per_row`
pub(crate) fn validate_pixels(
    width: u32,
    height: u32,
    pixels: usize,
    bytes_per_row: usize,
) -> Result<(), GpuError> {
    let row = width as usize * 4;
    if width == 0 || height == 0 || bytes_per_row < row {
        return Err(GpuError::InvalidDimensions { width, height });
    }
    let needed = bytes_per_row * (height as usize - 1) + row;
    if pixels < needed {
        return Err(GpuError::InvalidDimensions { width, height });
    }
    Ok(())
}
