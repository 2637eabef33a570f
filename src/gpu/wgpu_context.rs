// SPDX-License-Identifier: GPL-3.0-only

//! wgpu-backed execution context
//!
//! Programs are compiled from the [`ProgramLibrary`] on first resolution and
//! cached by [`ProgramKey`]: compute programs by function name, render
//! programs by their vertex and fragment pair. Pipelines use automatic layouts, so a program only
//! receives the bindings its WGSL declares.
//!
//! wgpu has no safe "don't care" load operation, so render passes always
//! clear to the pass's clear colour before drawing.

use super::{
    BufferUsage, CommandBuffer, ComputePass, GpuContext, GpuTexture, LoadAction, PixelFormat,
    ProgramKey, RenderPass, padded_bytes_per_row, read_buffer_async, validate_pixels,
};
use crate::constants::DevicePreference;
use crate::constants::graph::TILE_SIZE;
use crate::errors::GpuError;
use crate::handoff_queue::lock_recovering;
use crate::shaders::{ProgramLibrary, ShaderFunction, ShaderStage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
}

/// Create a wgpu device and queue for frame processing
pub async fn create_device(
    label: &str,
    preference: DevicePreference,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, GpuDeviceInfo), GpuError> {
    info!(label = label, ?preference, "Creating GPU device");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let power_preference = match preference {
        DevicePreference::LowPower => wgpu::PowerPreference::LowPower,
        DevicePreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    };

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| GpuError::NoAdapter(e.to_string()))?;

    let adapter_info = adapter.get_info();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
    };

    Ok((Arc::new(device), Arc::new(queue), info))
}

/// Run `f` inside a validation error scope
fn scoped<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(error.to_string()),
        None => Ok(value),
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
    }
}

/// Texture and its default view
#[derive(Clone)]
pub struct WgpuTexture {
    texture: Arc<wgpu::Texture>,
    view: Arc<wgpu::TextureView>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl WgpuTexture {
    pub fn raw(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl std::fmt::Debug for WgpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuTexture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

impl GpuTexture for WgpuTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }
}

pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    usage: BufferUsage,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

/// Compiled pipeline
#[derive(Clone)]
pub enum WgpuProgram {
    Compute(Arc<wgpu::ComputePipeline>),
    Render(Arc<wgpu::RenderPipeline>),
}

/// Execution context on a wgpu device
pub struct WgpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    library: ProgramLibrary,
    sampler: Arc<wgpu::Sampler>,
    modules: Mutex<HashMap<usize, wgpu::ShaderModule>>,
    programs: Mutex<HashMap<ProgramKey, WgpuProgram>>,
}

impl WgpuContext {
    /// Create a device and a context resolving the bundled programs
    pub fn new(preference: DevicePreference) -> Result<Self, GpuError> {
        Self::with_library(preference, ProgramLibrary::with_builtins())
    }

    pub fn with_library(
        preference: DevicePreference,
        library: ProgramLibrary,
    ) -> Result<Self, GpuError> {
        let (device, queue, info) =
            pollster::block_on(create_device("frame_pipeline_gpu", preference))?;
        Ok(Self::from_device(device, queue, info, library))
    }

    /// Wrap an existing device (e.g. one shared with a presentation surface)
    pub fn from_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        info: GpuDeviceInfo,
        library: ProgramLibrary,
    ) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            device,
            queue,
            info,
            library,
            sampler: Arc::new(sampler),
            modules: Mutex::new(HashMap::new()),
            programs: Mutex::new(HashMap::new()),
        }
    }

    pub fn info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Shader module for a function's WGSL source, compiled once per source
    fn module(&self, function: &ShaderFunction) -> Result<wgpu::ShaderModule, GpuError> {
        let key = Arc::as_ptr(&function.source) as *const u8 as usize;
        let mut modules = lock_recovering(&self.modules);
        if let Some(module) = modules.get(&key) {
            return Ok(module.clone());
        }

        let module = scoped(&self.device, || {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&function.name),
                    source: wgpu::ShaderSource::Wgsl(function.source.as_ref().into()),
                })
        })
        .map_err(|e| GpuError::PipelineCreation(format!("{}: {}", function.name, e)))?;

        modules.insert(key, module.clone());
        Ok(module)
    }

    fn cached_program(&self, key: &ProgramKey) -> Option<WgpuProgram> {
        lock_recovering(&self.programs).get(key).cloned()
    }

    fn cache_program(&self, key: ProgramKey, program: WgpuProgram) -> WgpuProgram {
        lock_recovering(&self.programs)
            .entry(key)
            .or_insert(program)
            .clone()
    }
}

impl GpuContext for WgpuContext {
    type Texture = WgpuTexture;
    type Buffer = WgpuBuffer;
    type Program = WgpuProgram;
    type CommandBuffer = WgpuCommandBuffer;

    fn resolve_compute_program(&self, name: &str) -> Result<WgpuProgram, GpuError> {
        let key = ProgramKey::Compute(name.to_string());
        if let Some(program) = self.cached_program(&key) {
            return Ok(program);
        }

        let function = self.library.function(name, ShaderStage::Compute)?;
        let module = self.module(function)?;

        let pipeline = scoped(&self.device, || {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(name),
                    layout: None,
                    module: &module,
                    entry_point: Some(function.entry_point()),
                    compilation_options: Default::default(),
                    cache: None,
                })
        })
        .map_err(|e| GpuError::PipelineCreation(format!("{}: {}", name, e)))?;

        debug!(name, "Compute pipeline created");
        Ok(self.cache_program(key, WgpuProgram::Compute(Arc::new(pipeline))))
    }

    fn resolve_render_program(
        &self,
        vertex: &str,
        fragment: &str,
    ) -> Result<WgpuProgram, GpuError> {
        let key = ProgramKey::render(vertex, fragment);
        if let Some(program) = self.cached_program(&key) {
            return Ok(program);
        }
        let label = key.to_string();

        let vertex_function = self.library.function(vertex, ShaderStage::Vertex)?;
        let fragment_function = self.library.function(fragment, ShaderStage::Fragment)?;
        let vertex_module = self.module(vertex_function)?;
        let fragment_module = self.module(fragment_function)?;

        const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: 0,
        }];
        const TEX_COORD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: 1,
        }];
        let stride = (2 * std::mem::size_of::<f32>()) as wgpu::BufferAddress;

        let pipeline = scoped(&self.device, || {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&label),
                    layout: None,
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: Some(vertex_function.entry_point()),
                        compilation_options: Default::default(),
                        buffers: &[
                            wgpu::VertexBufferLayout {
                                array_stride: stride,
                                step_mode: wgpu::VertexStepMode::Vertex,
                                attributes: &POSITION_ATTRIBUTES,
                            },
                            wgpu::VertexBufferLayout {
                                array_stride: stride,
                                step_mode: wgpu::VertexStepMode::Vertex,
                                attributes: &TEX_COORD_ATTRIBUTES,
                            },
                        ],
                    },
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: Some(fragment_function.entry_point()),
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    multiview: None,
                    cache: None,
                })
        })
        .map_err(|e| GpuError::PipelineCreation(format!("{}: {}", key, e)))?;

        debug!(vertex, fragment, "Render pipeline created");
        Ok(self.cache_program(key, WgpuProgram::Render(Arc::new(pipeline))))
    }

    fn allocate_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<WgpuTexture, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions { width, height });
        }

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        // BGRA storage needs an optional device feature
        if format == PixelFormat::Rgba8Unorm {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let texture = scoped(&self.device, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("frame_texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(format),
                usage,
                view_formats: &[],
            })
        })
        .map_err(GpuError::TextureAllocation)?;

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(WgpuTexture {
            texture: Arc::new(texture),
            view: Arc::new(view),
            width,
            height,
            format,
        })
    }

    fn write_texture(
        &self,
        texture: &WgpuTexture,
        pixels: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GpuError> {
        validate_pixels(
            texture.width,
            texture.height,
            pixels.len(),
            bytes_per_row as usize,
        )?;

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(texture.height),
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn allocate_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<WgpuBuffer, GpuError> {
        if contents.is_empty() {
            return Err(GpuError::BufferAllocation(format!("{} is empty", label)));
        }

        let usages = match usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
        } | wgpu::BufferUsages::COPY_DST;

        let buffer = scoped(&self.device, || {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: usages,
                })
        })
        .map_err(GpuError::BufferAllocation)?;

        Ok(WgpuBuffer { buffer, usage })
    }

    fn write_buffer(&self, buffer: &WgpuBuffer, contents: &[u8]) {
        if contents.len() as u64 > buffer.buffer.size() {
            warn!(
                size = buffer.buffer.size(),
                write = contents.len(),
                "Buffer write larger than buffer, ignoring"
            );
            return;
        }
        self.queue.write_buffer(&buffer.buffer, 0, contents);
    }

    fn new_command_buffer(&self) -> WgpuCommandBuffer {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_command_buffer"),
            });

        WgpuCommandBuffer {
            encoder,
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
            sampler: Arc::clone(&self.sampler),
        }
    }

    fn read_texture(
        &self,
        texture: &WgpuTexture,
        dst: &mut [u8],
        bytes_per_row: usize,
    ) -> Result<(), GpuError> {
        let (width, height) = texture.size();
        validate_pixels(width, height, dst.len(), bytes_per_row)
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let padded = padded_bytes_per_row(width);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let data = pollster::block_on(read_buffer_async(&self.device, &staging))?;

        let row = width as usize * 4;
        for y in 0..height as usize {
            dst[y * bytes_per_row..][..row].copy_from_slice(&data[y * padded as usize..][..row]);
        }
        Ok(())
    }
}

/// Command encoder plus what it needs to build bind groups
pub struct WgpuCommandBuffer {
    encoder: wgpu::CommandEncoder,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    sampler: Arc<wgpu::Sampler>,
}

impl WgpuCommandBuffer {
    fn bind_group(
        &self,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        entries: &[wgpu::BindGroupEntry<'_>],
    ) -> Option<wgpu::BindGroup> {
        match scoped(&self.device, || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries,
            })
        }) {
            Ok(group) => Some(group),
            Err(e) => {
                warn!(pass = label, error = %e, "Bind group rejected, skipping pass");
                None
            }
        }
    }

    fn submit(self) -> Result<(), GpuError> {
        let commands = scoped(&self.device, || self.encoder.finish())
            .map_err(GpuError::Submission)?;
        self.queue.submit(Some(commands));
        Ok(())
    }
}

impl CommandBuffer<WgpuContext> for WgpuCommandBuffer {
    fn encode_compute(&mut self, pass: &ComputePass<'_, WgpuContext>) {
        let WgpuProgram::Compute(pipeline) = pass.program else {
            warn!(pass = pass.label, "Render program used for a compute pass");
            return;
        };
        if pass.threads_per_threadgroup != [TILE_SIZE, TILE_SIZE, 1] {
            debug!(
                pass = pass.label,
                threads = ?pass.threads_per_threadgroup,
                "Workgroup size is fixed by the WGSL declaration"
            );
        }

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&pass.input.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&pass.output.view),
            },
        ];
        extend_entries(&mut entries, pass.extra.textures(), pass.extra.buffers());

        let layout = pipeline.get_bind_group_layout(0);
        let Some(bind_group) = self.bind_group(pass.label, &layout, &entries) else {
            return;
        };

        let mut compute = self
            .encoder
            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(pass.label),
                timestamp_writes: None,
            });
        compute.set_pipeline(pipeline);
        compute.set_bind_group(0, &bind_group, &[]);
        let [x, y, z] = pass.threadgroups;
        compute.dispatch_workgroups(x, y, z);
    }

    fn encode_render(&mut self, pass: &RenderPass<'_, WgpuContext>) {
        let WgpuProgram::Render(pipeline) = pass.program else {
            warn!(pass = pass.label, "Compute program used for a render pass");
            return;
        };

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&pass.input.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
        ];
        extend_entries(&mut entries, pass.extra.textures(), pass.extra.buffers());

        let layout = pipeline.get_bind_group_layout(0);
        let Some(bind_group) = self.bind_group(pass.label, &layout, &entries) else {
            return;
        };

        let [r, g, b, a] = pass.clear_color;
        // Both load actions clear; see module docs
        let load = match pass.load {
            LoadAction::DontCare | LoadAction::Clear => {
                wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a })
            }
        };

        let mut render = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(pass.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &pass.target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render.set_pipeline(pipeline);
        render.set_bind_group(0, &bind_group, &[]);
        render.set_vertex_buffer(0, pass.positions.buffer.slice(..));
        render.set_vertex_buffer(1, pass.tex_coords.buffer.slice(..));
        render.set_index_buffer(pass.indices.buffer.slice(..), wgpu::IndexFormat::Uint16);
        render.draw_indexed(0..pass.index_count, 0, 0..1);
    }

    fn commit(self) {
        if let Err(e) = self.submit() {
            warn!(error = %e, "Command buffer rejected");
        }
    }

    fn commit_and_wait(self) -> Result<(), GpuError> {
        let device = Arc::clone(&self.device);
        self.submit()?;
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| GpuError::Submission(e.to_string()))
    }
}

fn extend_entries<'a>(
    entries: &mut Vec<wgpu::BindGroupEntry<'a>>,
    textures: &[(u32, &'a WgpuTexture)],
    buffers: &[(u32, &'a WgpuBuffer)],
) {
    for (slot, texture) in textures {
        entries.push(wgpu::BindGroupEntry {
            binding: *slot,
            resource: wgpu::BindingResource::TextureView(&texture.view),
        });
    }
    for (slot, buffer) in buffers {
        entries.push(wgpu::BindGroupEntry {
            binding: *slot,
            resource: buffer.buffer.as_entire_binding(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_context() {
        // This test requires a GPU, so it may be skipped in CI
        match WgpuContext::new(DevicePreference::LowPower) {
            Ok(context) => {
                assert!(!context.info().adapter_name.is_empty());
                let first = context
                    .resolve_compute_program(crate::shaders::GRAYSCALE_COMPUTE)
                    .map(|_| ());
                assert!(first.is_ok(), "{:?}", first);
            }
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }
}
