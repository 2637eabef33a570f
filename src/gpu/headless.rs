// SPDX-License-Identifier: GPL-3.0-only

//! Execution context without a GPU
//!
//! Records every allocation, command buffer and pass so graph behaviour can
//! be inspected in tests and in the CLI dry run. Committed passes are
//! approximated on the CPU: the bundled compute programs are applied per
//! pixel over whole tiles, unknown compute programs copy their input, and
//! render passes stretch the input over the target with nearest sampling.

use super::{
    BufferUsage, CommandBuffer, ComputePass, GpuContext, GpuTexture, LoadAction, PixelFormat,
    ProgramKey, RenderPass, validate_pixels,
};
use crate::constants::graph::TILE_SIZE;
use crate::errors::GpuError;
use crate::handoff_queue::lock_recovering;
use crate::shaders::{
    GRAYSCALE_COMPUTE, PASSTHROUGH_COMPUTE, ProgramLibrary, SEPIA_COMPUTE, ShaderStage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Snapshot of what a [`HeadlessContext`] has been asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadlessStats {
    pub textures_allocated: u64,
    pub buffers_allocated: u64,
    pub command_buffers_created: u64,
    pub commits: u64,
    pub waits: u64,
    pub programs_compiled: u64,
    pub readbacks: u64,
}

/// Texture backed by CPU memory
#[derive(Clone)]
pub struct HeadlessTexture {
    inner: Arc<TextureInner>,
}

struct TextureInner {
    id: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Mutex<Vec<u8>>,
}

impl HeadlessTexture {
    /// Unique per allocation; clones share it
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Tightly packed copy of the current contents
    pub fn pixels(&self) -> Vec<u8> {
        lock_recovering(&self.inner.pixels).clone()
    }
}

impl std::fmt::Debug for HeadlessTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessTexture")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .finish()
    }
}

impl GpuTexture for HeadlessTexture {
    fn width(&self) -> u32 {
        self.inner.width
    }

    fn height(&self) -> u32 {
        self.inner.height
    }

    fn format(&self) -> PixelFormat {
        self.inner.format
    }
}

/// Buffer backed by CPU memory
#[derive(Debug)]
pub struct HeadlessBuffer {
    id: u64,
    label: String,
    usage: BufferUsage,
    contents: Mutex<Vec<u8>>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn contents(&self) -> Vec<u8> {
        lock_recovering(&self.contents).clone()
    }

    /// Contents reinterpreted as `f32` values
    pub fn as_f32(&self) -> Vec<f32> {
        self.contents()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Resolved program: the function names it was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadlessProgram {
    Compute(String),
    Render { vertex: String, fragment: String },
}

impl HeadlessProgram {
    pub fn key(&self) -> ProgramKey {
        match self {
            HeadlessProgram::Compute(name) => ProgramKey::Compute(name.clone()),
            HeadlessProgram::Render { vertex, fragment } => ProgramKey::render(vertex, fragment),
        }
    }
}

/// A pass as it was encoded
#[derive(Debug, Clone)]
pub enum EncodedPass {
    Compute {
        label: String,
        program: HeadlessProgram,
        input: HeadlessTexture,
        output: HeadlessTexture,
        threadgroups: [u32; 3],
        /// Buffer contents captured at encode time, by slot
        extra_buffers: Vec<(u32, Vec<u8>)>,
    },
    Render {
        label: String,
        program: HeadlessProgram,
        input: HeadlessTexture,
        target: HeadlessTexture,
        load: LoadAction,
        index_count: u32,
    },
}

impl EncodedPass {
    pub fn label(&self) -> &str {
        match self {
            EncodedPass::Compute { label, .. } | EncodedPass::Render { label, .. } => label,
        }
    }
}

/// A command buffer after commit
#[derive(Debug, Clone)]
pub struct CommittedBuffer {
    pub id: u64,
    pub passes: Vec<EncodedPass>,
    pub waited: bool,
}

struct Recorder {
    next_id: AtomicU64,
    textures_allocated: AtomicU64,
    buffers_allocated: AtomicU64,
    command_buffers_created: AtomicU64,
    commits: AtomicU64,
    waits: AtomicU64,
    programs_compiled: AtomicU64,
    readbacks: AtomicU64,
    committed: Mutex<Vec<CommittedBuffer>>,
}

impl Recorder {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// CPU-only execution context
pub struct HeadlessContext {
    library: ProgramLibrary,
    recorder: Arc<Recorder>,
    programs: Mutex<HashMap<ProgramKey, HeadlessProgram>>,
    fail_texture_allocation: AtomicBool,
}

impl HeadlessContext {
    /// Context resolving the bundled programs
    pub fn new() -> Self {
        Self::with_library(ProgramLibrary::with_builtins())
    }

    pub fn with_library(library: ProgramLibrary) -> Self {
        Self {
            library,
            recorder: Arc::new(Recorder {
                next_id: AtomicU64::new(0),
                textures_allocated: AtomicU64::new(0),
                buffers_allocated: AtomicU64::new(0),
                command_buffers_created: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                waits: AtomicU64::new(0),
                programs_compiled: AtomicU64::new(0),
                readbacks: AtomicU64::new(0),
                committed: Mutex::new(Vec::new()),
            }),
            programs: Mutex::new(HashMap::new()),
            fail_texture_allocation: AtomicBool::new(false),
        }
    }

    /// Make subsequent texture allocations fail
    pub fn set_fail_texture_allocation(&self, fail: bool) {
        self.fail_texture_allocation.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> HeadlessStats {
        let r = &self.recorder;
        HeadlessStats {
            textures_allocated: r.textures_allocated.load(Ordering::SeqCst),
            buffers_allocated: r.buffers_allocated.load(Ordering::SeqCst),
            command_buffers_created: r.command_buffers_created.load(Ordering::SeqCst),
            commits: r.commits.load(Ordering::SeqCst),
            waits: r.waits.load(Ordering::SeqCst),
            programs_compiled: r.programs_compiled.load(Ordering::SeqCst),
            readbacks: r.readbacks.load(Ordering::SeqCst),
        }
    }

    /// Every committed buffer in commit order
    pub fn committed(&self) -> Vec<CommittedBuffer> {
        lock_recovering(&self.recorder.committed).clone()
    }

    fn memoized(&self, key: ProgramKey, build: impl FnOnce() -> HeadlessProgram) -> HeadlessProgram {
        let mut programs = lock_recovering(&self.programs);
        programs
            .entry(key)
            .or_insert_with(|| {
                self.recorder.programs_compiled.fetch_add(1, Ordering::SeqCst);
                build()
            })
            .clone()
    }
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuContext for HeadlessContext {
    type Texture = HeadlessTexture;
    type Buffer = HeadlessBuffer;
    type Program = HeadlessProgram;
    type CommandBuffer = HeadlessCommandBuffer;

    fn resolve_compute_program(&self, name: &str) -> Result<HeadlessProgram, GpuError> {
        self.library.function(name, ShaderStage::Compute)?;
        Ok(self.memoized(ProgramKey::Compute(name.to_string()), || {
            HeadlessProgram::Compute(name.to_string())
        }))
    }

    fn resolve_render_program(
        &self,
        vertex: &str,
        fragment: &str,
    ) -> Result<HeadlessProgram, GpuError> {
        self.library.function(vertex, ShaderStage::Vertex)?;
        self.library.function(fragment, ShaderStage::Fragment)?;
        Ok(self.memoized(ProgramKey::render(vertex, fragment), || {
            HeadlessProgram::Render {
                vertex: vertex.to_string(),
                fragment: fragment.to_string(),
            }
        }))
    }

    fn allocate_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<HeadlessTexture, GpuError> {
        if self.fail_texture_allocation.load(Ordering::SeqCst) {
            return Err(GpuError::TextureAllocation(format!(
                "injected failure for {}x{}",
                width, height
            )));
        }
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions { width, height });
        }

        self.recorder
            .textures_allocated
            .fetch_add(1, Ordering::SeqCst);
        let id = self.recorder.next_id();
        trace!(id, width, height, "Headless texture allocated");

        Ok(HeadlessTexture {
            inner: Arc::new(TextureInner {
                id,
                width,
                height,
                format,
                pixels: Mutex::new(vec![0; width as usize * height as usize * 4]),
            }),
        })
    }

    fn write_texture(
        &self,
        texture: &HeadlessTexture,
        pixels: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GpuError> {
        let (width, height) = texture.size();
        validate_pixels(width, height, pixels.len(), bytes_per_row as usize)?;

        let row = width as usize * 4;
        let mut dst = lock_recovering(&texture.inner.pixels);
        for y in 0..height as usize {
            let src = &pixels[y * bytes_per_row as usize..][..row];
            dst[y * row..][..row].copy_from_slice(src);
        }
        Ok(())
    }

    fn allocate_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<HeadlessBuffer, GpuError> {
        if contents.is_empty() {
            return Err(GpuError::BufferAllocation(format!("{} is empty", label)));
        }
        self.recorder.buffers_allocated.fetch_add(1, Ordering::SeqCst);
        Ok(HeadlessBuffer {
            id: self.recorder.next_id(),
            label: label.to_string(),
            usage,
            contents: Mutex::new(contents.to_vec()),
        })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, contents: &[u8]) {
        let mut dst = lock_recovering(&buffer.contents);
        if dst.len() != contents.len() {
            debug!(
                label = %buffer.label,
                expected = dst.len(),
                got = contents.len(),
                "Buffer write size mismatch, resizing"
            );
        }
        *dst = contents.to_vec();
    }

    fn new_command_buffer(&self) -> HeadlessCommandBuffer {
        self.recorder
            .command_buffers_created
            .fetch_add(1, Ordering::SeqCst);
        HeadlessCommandBuffer {
            id: self.recorder.next_id(),
            passes: Vec::new(),
            recorder: Arc::clone(&self.recorder),
        }
    }

    fn read_texture(
        &self,
        texture: &HeadlessTexture,
        dst: &mut [u8],
        bytes_per_row: usize,
    ) -> Result<(), GpuError> {
        let (width, height) = texture.size();
        validate_pixels(width, height, dst.len(), bytes_per_row)
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let row = width as usize * 4;
        let src = lock_recovering(&texture.inner.pixels);
        for y in 0..height as usize {
            dst[y * bytes_per_row..][..row].copy_from_slice(&src[y * row..][..row]);
        }
        self.recorder.readbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Command buffer that records passes and runs them on commit
pub struct HeadlessCommandBuffer {
    id: u64,
    passes: Vec<EncodedPass>,
    recorder: Arc<Recorder>,
}

impl HeadlessCommandBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn passes(&self) -> &[EncodedPass] {
        &self.passes
    }

    fn submit(self, waited: bool) {
        for pass in &self.passes {
            execute(pass);
        }
        self.recorder.commits.fetch_add(1, Ordering::SeqCst);
        if waited {
            self.recorder.waits.fetch_add(1, Ordering::SeqCst);
        }
        lock_recovering(&self.recorder.committed).push(CommittedBuffer {
            id: self.id,
            passes: self.passes,
            waited,
        });
    }
}

impl CommandBuffer<HeadlessContext> for HeadlessCommandBuffer {
    fn encode_compute(&mut self, pass: &ComputePass<'_, HeadlessContext>) {
        self.passes.push(EncodedPass::Compute {
            label: pass.label.to_string(),
            program: pass.program.clone(),
            input: pass.input.clone(),
            output: pass.output.clone(),
            threadgroups: pass.threadgroups,
            extra_buffers: pass
                .extra
                .buffers()
                .iter()
                .map(|(slot, buffer)| (*slot, buffer.contents()))
                .collect(),
        });
    }

    fn encode_render(&mut self, pass: &RenderPass<'_, HeadlessContext>) {
        self.passes.push(EncodedPass::Render {
            label: pass.label.to_string(),
            program: pass.program.clone(),
            input: pass.input.clone(),
            target: pass.target.clone(),
            load: pass.load,
            index_count: pass.index_count,
        });
    }

    fn commit(self) {
        self.submit(false);
    }

    fn commit_and_wait(self) -> Result<(), GpuError> {
        self.submit(true);
        Ok(())
    }
}

fn execute(pass: &EncodedPass) {
    match pass {
        EncodedPass::Compute {
            program,
            input,
            output,
            threadgroups,
            extra_buffers,
            ..
        } => {
            let intensity = extra_buffers
                .iter()
                .find(|(slot, _)| *slot == 2)
                .and_then(|(_, bytes)| bytes.get(..4))
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(1.0);
            let name = match program {
                HeadlessProgram::Compute(name) => name.as_str(),
                HeadlessProgram::Render { .. } => PASSTHROUGH_COMPUTE,
            };
            run_compute(name, intensity, input, output, *threadgroups);
        }
        EncodedPass::Render { input, target, .. } => stretch(input, target),
    }
}

fn run_compute(
    name: &str,
    intensity: f32,
    input: &HeadlessTexture,
    output: &HeadlessTexture,
    threadgroups: [u32; 3],
) {
    let src = input.pixels();
    let mut dst = lock_recovering(&output.inner.pixels);
    let covered_w = (threadgroups[0] * TILE_SIZE).min(input.width()).min(output.width());
    let covered_h = (threadgroups[1] * TILE_SIZE).min(input.height()).min(output.height());
    let src_row = input.width() as usize * 4;
    let dst_row = output.width() as usize * 4;

    for y in 0..covered_h as usize {
        for x in 0..covered_w as usize {
            let s = &src[y * src_row + x * 4..][..4];
            let d = &mut dst[y * dst_row + x * 4..][..4];
            let [r, g, b, a] = [s[0], s[1], s[2], s[3]].map(|c| c as f32 / 255.0);
            let rgb = match name {
                GRAYSCALE_COMPUTE => {
                    let l = r * 0.2125 + g * 0.7154 + b * 0.0721;
                    [l, l, l]
                }
                SEPIA_COMPUTE => {
                    let t = intensity.clamp(0.0, 1.0);
                    let sepia = [
                        (r * 0.393 + g * 0.769 + b * 0.189).min(1.0),
                        (r * 0.349 + g * 0.686 + b * 0.168).min(1.0),
                        (r * 0.272 + g * 0.534 + b * 0.131).min(1.0),
                    ];
                    [
                        r + (sepia[0] - r) * t,
                        g + (sepia[1] - g) * t,
                        b + (sepia[2] - b) * t,
                    ]
                }
                _ => [r, g, b],
            };
            d[0] = to_byte(rgb[0]);
            d[1] = to_byte(rgb[1]);
            d[2] = to_byte(rgb[2]);
            d[3] = to_byte(a);
        }
    }
}

fn stretch(input: &HeadlessTexture, target: &HeadlessTexture) {
    let src = input.pixels();
    let (sw, sh) = input.size();
    let (tw, th) = target.size();
    let mut dst = lock_recovering(&target.inner.pixels);

    for y in 0..th as usize {
        let sy = (y * sh as usize) / th as usize;
        for x in 0..tw as usize {
            let sx = (x * sw as usize) / tw as usize;
            let s = &src[(sy * sw as usize + sx) * 4..][..4];
            dst[(y * tw as usize + x) * 4..][..4].copy_from_slice(s);
        }
    }
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Bindings;

    #[test]
    fn test_program_resolution_is_memoized() {
        let context = HeadlessContext::new();
        let a = context.resolve_compute_program(GRAYSCALE_COMPUTE).unwrap();
        let b = context.resolve_compute_program(GRAYSCALE_COMPUTE).unwrap();
        assert_eq!(a, b);
        assert_eq!(context.stats().programs_compiled, 1);

        assert!(matches!(
            context.resolve_compute_program("nope"),
            Err(GpuError::ProgramNotFound(_))
        ));
    }

    #[test]
    fn test_render_program_keyed_by_pair() {
        let context = HeadlessContext::new();
        let program = context
            .resolve_render_program("basic_vertex", "basic_fragment")
            .unwrap();
        assert_eq!(
            program.key(),
            ProgramKey::Render("basic_vertex".into(), "basic_fragment".into())
        );
    }

    #[test]
    fn test_program_keys_do_not_collide() {
        let mut library = ProgramLibrary::with_builtins();
        library.register_module(
            "// test functions",
            &[
                ("ab", ShaderStage::Vertex),
                ("a", ShaderStage::Vertex),
                ("c", ShaderStage::Fragment),
                ("bc", ShaderStage::Fragment),
                ("v", ShaderStage::Vertex),
                ("f", ShaderStage::Fragment),
                ("vf", ShaderStage::Compute),
            ],
        );
        let context = HeadlessContext::with_library(library);

        let first = context.resolve_render_program("ab", "c").unwrap();
        let second = context.resolve_render_program("a", "bc").unwrap();
        assert_eq!(
            first,
            HeadlessProgram::Render { vertex: "ab".into(), fragment: "c".into() }
        );
        assert_eq!(
            second,
            HeadlessProgram::Render { vertex: "a".into(), fragment: "bc".into() }
        );

        context.resolve_render_program("v", "f").unwrap();
        let compute = context.resolve_compute_program("vf").unwrap();
        assert_eq!(compute, HeadlessProgram::Compute("vf".into()));
        assert_eq!(context.stats().programs_compiled, 4);
    }

    #[test]
    fn test_grayscale_covers_whole_tiles_only() {
        let context = HeadlessContext::new();
        let pixels: Vec<u8> = std::iter::repeat([255u8, 0, 0, 255])
            .take(12 * 8)
            .flatten()
            .collect();
        let input = context
            .upload_texture(12, 8, PixelFormat::Rgba8Unorm, &pixels, 48)
            .unwrap();
        let output = context
            .allocate_texture(12, 8, PixelFormat::Rgba8Unorm)
            .unwrap();
        let program = context.resolve_compute_program(GRAYSCALE_COMPUTE).unwrap();

        let mut buffer = context.new_command_buffer();
        buffer.encode_compute(&ComputePass {
            label: "grayscale",
            program: &program,
            input: &input,
            output: &output,
            extra: Bindings::new(2),
            threadgroups: [1, 1, 1],
            threads_per_threadgroup: [8, 8, 1],
        });
        buffer.commit_and_wait().unwrap();

        let out = output.pixels();
        // Inside the first tile: red luminance
        assert_eq!(&out[0..4], &[54, 54, 54, 255]);
        // Column 8 lies past the only tile and stays untouched
        assert_eq!(&out[8 * 4..8 * 4 + 4], &[0, 0, 0, 0]);
        assert_eq!(context.stats().waits, 1);
    }
}
