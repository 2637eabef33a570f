// SPDX-License-Identifier: GPL-3.0-only

//! GPU filter stages
//!
//! A [`Filter`] is a graph node with one input and one output texture. Its
//! kind is fixed at construction: a compute dispatch over 8x8 tiles, or an
//! indexed draw of the full-screen quad. Stage-specific bindings come from a
//! [`FilterConfigurator`].
//!
//! The output texture is allocated on the first tick at the input's size
//! and reused until the input size changes or [`Filter::invalidate_output`]
//! is called. When the program could not be resolved or the output cannot
//! be allocated, the filter forwards its input unprocessed so downstream
//! nodes keep receiving frames.
//!
//! Compute dispatches cover `width / 8` by `height / 8` threadgroups.
//! Pixels past the last whole tile are not written.

pub mod builtin;
pub mod geometry;

pub use builtin::{IntensityHandle, SepiaParams, copy, grayscale, passthrough, sepia};
pub use geometry::{FillMode, QUAD_INDICES, QUAD_VERTICES, TextureRotation};

use crate::constants::graph::{CLEAR_COLOR, QUAD_INDEX_COUNT, TILE_SIZE};
use crate::errors::GpuError;
use crate::gpu::{
    Bindings, BufferUsage, CommandBuffer, ComputePass, GpuContext, GpuTexture, LoadAction,
    PixelFormat, RenderPass, TextureSlot, threadgroup_count,
};
use crate::graph::{FrameConsumer, FrameSource, Targets, Timestamp};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Binding slot where configurator resources start
pub const FIRST_EXTRA_SLOT: u32 = 2;

/// Which GPU program a filter runs
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    /// Compute function reading slot 0 and writing slot 1
    Compute { function: String },
    /// Vertex and fragment functions drawing the quad
    Render {
        vertex: String,
        fragment: String,
        rotation: TextureRotation,
    },
}

impl FilterKind {
    pub fn compute(function: &str) -> Self {
        FilterKind::Compute {
            function: function.to_string(),
        }
    }

    pub fn render(vertex: &str, fragment: &str, rotation: TextureRotation) -> Self {
        FilterKind::Render {
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
            rotation,
        }
    }
}

/// Supplies a filter's extra bindings each tick
///
/// Resources must be bound at [`FIRST_EXTRA_SLOT`] or above.
pub trait FilterConfigurator<C: GpuContext>: Send {
    fn configure_compute<'a>(&'a self, _context: &C, _bindings: &mut Bindings<'a, C>) {}

    fn configure_render<'a>(&'a self, _context: &C, _bindings: &mut Bindings<'a, C>) {}
}

/// Configurator for filters without extra bindings
pub struct NoConfiguration;

impl<C: GpuContext> FilterConfigurator<C> for NoConfiguration {}

struct QuadBuffers<C: GpuContext> {
    positions: C::Buffer,
    tex_coords: C::Buffer,
    indices: C::Buffer,
}

impl<C: GpuContext> QuadBuffers<C> {
    fn new(context: &C, rotation: TextureRotation) -> Result<Self, GpuError> {
        Ok(Self {
            positions: context.allocate_buffer_from(
                "quad_positions",
                &QUAD_VERTICES,
                BufferUsage::Vertex,
            )?,
            tex_coords: context.allocate_buffer_from(
                "quad_tex_coords",
                &rotation.tex_coords(),
                BufferUsage::Vertex,
            )?,
            indices: context.allocate_buffer_from(
                "quad_indices",
                &QUAD_INDICES,
                BufferUsage::Index,
            )?,
        })
    }
}

/// Everything a filter needs to encode its work, apart from the graph wiring
struct Stage<C: GpuContext> {
    label: String,
    kind: FilterKind,
    program: Option<C::Program>,
    quad: Option<QuadBuffers<C>>,
    configurator: Box<dyn FilterConfigurator<C>>,
    output: TextureSlot<C>,
    allocation_failed: bool,
}

impl<C: GpuContext> Stage<C> {
    /// Encode this stage into `command_buffer` and return the texture to forward
    fn encode(
        &mut self,
        context: &C,
        command_buffer: &mut C::CommandBuffer,
        input: &C::Texture,
    ) -> C::Texture {
        let Some(program) = self.program.as_ref() else {
            return input.clone();
        };

        let (width, height) = input.size();
        let output = match self.output.ensure(context, width, height) {
            Ok(texture) => {
                self.allocation_failed = false;
                texture.clone()
            }
            Err(e) => {
                if !self.allocation_failed {
                    error!(filter = %self.label, error = %e, "Output texture unavailable, forwarding input");
                }
                self.allocation_failed = true;
                return input.clone();
            }
        };

        match &self.kind {
            FilterKind::Compute { .. } => {
                let mut extra = Bindings::new(FIRST_EXTRA_SLOT);
                self.configurator.configure_compute(context, &mut extra);
                command_buffer.encode_compute(&ComputePass {
                    label: &self.label,
                    program,
                    input,
                    output: &output,
                    extra,
                    threadgroups: [
                        threadgroup_count(width, TILE_SIZE),
                        threadgroup_count(height, TILE_SIZE),
                        1,
                    ],
                    threads_per_threadgroup: [TILE_SIZE, TILE_SIZE, 1],
                });
            }
            FilterKind::Render { .. } => {
                let Some(quad) = self.quad.as_ref() else {
                    return input.clone();
                };
                let mut extra = Bindings::new(FIRST_EXTRA_SLOT);
                self.configurator.configure_render(context, &mut extra);
                command_buffer.encode_render(&RenderPass {
                    label: &self.label,
                    program,
                    target: &output,
                    load: LoadAction::DontCare,
                    clear_color: CLEAR_COLOR,
                    positions: &quad.positions,
                    tex_coords: &quad.tex_coords,
                    indices: &quad.indices,
                    index_count: QUAD_INDEX_COUNT,
                    input,
                    extra,
                });
            }
        }

        output
    }
}

/// Source-and-consumer node running one GPU program
pub struct Filter<C: GpuContext> {
    context: Arc<C>,
    stage: Stage<C>,
    input: Option<C::Texture>,
    targets: Targets<C>,
}

impl<C: GpuContext> Filter<C> {
    /// Filter without extra bindings
    pub fn new(context: Arc<C>, label: &str, kind: FilterKind) -> Self {
        Self::with_configurator(context, label, kind, NoConfiguration)
    }

    /// Filter whose extra bindings come from `configurator`
    ///
    /// Program resolution (and, for render filters, quad buffer allocation)
    /// happens here. Failures are logged and leave the filter forwarding its
    /// input unchanged.
    pub fn with_configurator(
        context: Arc<C>,
        label: &str,
        kind: FilterKind,
        configurator: impl FilterConfigurator<C> + 'static,
    ) -> Self {
        let program = match &kind {
            FilterKind::Compute { function } => context.resolve_compute_program(function),
            FilterKind::Render {
                vertex, fragment, ..
            } => context.resolve_render_program(vertex, fragment),
        };
        let mut program = match program {
            Ok(program) => Some(program),
            Err(e) => {
                error!(filter = label, error = %e, "Filter program unavailable, stage disabled");
                None
            }
        };

        let quad = match &kind {
            FilterKind::Render { rotation, .. } if program.is_some() => {
                match QuadBuffers::<C>::new(&context, *rotation) {
                    Ok(quad) => Some(quad),
                    Err(e) => {
                        error!(filter = label, error = %e, "Quad buffers unavailable, stage disabled");
                        program = None;
                        None
                    }
                }
            }
            _ => None,
        };

        info!(filter = label, kind = ?kind, configured = program.is_some(), "Filter created");

        Self {
            context,
            stage: Stage {
                label: label.to_string(),
                kind,
                program,
                quad,
                configurator: Box::new(configurator),
                output: TextureSlot::new(PixelFormat::Rgba8Unorm),
                allocation_failed: false,
            },
            input: None,
            targets: Targets::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.stage.label
    }

    pub fn kind(&self) -> &FilterKind {
        &self.stage.kind
    }

    /// Whether the program resolved; unconfigured filters forward their input
    pub fn is_configured(&self) -> bool {
        self.stage.program.is_some()
    }

    /// Turn the stage off, e.g. when its configurator could not be built
    pub fn disable(&mut self) {
        debug!(filter = %self.stage.label, "Filter disabled");
        self.stage.program = None;
    }

    /// Most recent input
    pub fn input_texture(&self) -> Option<&C::Texture> {
        self.input.as_ref()
    }

    pub fn output_texture(&self) -> Option<&C::Texture> {
        self.stage.output.get()
    }

    /// Drop the output texture; the next tick allocates a new one
    pub fn invalidate_output(&mut self) {
        self.stage.output.invalidate();
    }
}

impl<C: GpuContext> FrameSource<C> for Filter<C> {
    fn targets(&self) -> &Targets<C> {
        &self.targets
    }

    fn targets_mut(&mut self) -> &mut Targets<C> {
        &mut self.targets
    }
}

impl<C: GpuContext> FrameConsumer<C> for Filter<C> {
    fn new_frame_ready(
        &mut self,
        input: C::Texture,
        time: Timestamp,
        command_buffer: C::CommandBuffer,
    ) {
        self.input = Some(input.clone());
        let context = &*self.context;
        let stage = &mut self.stage;
        self.targets
            .relay(context, command_buffer, time, |buffer| {
                stage.encode(context, buffer, &input)
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;
    use crate::gpu::headless::EncodedPass;
    use crate::graph::{ConsumerRef, shared};
    use crate::shaders::{BASIC_FRAGMENT, BASIC_VERTEX, GRAYSCALE_COMPUTE};
    use std::sync::Mutex;

    /// Terminal node that commits and remembers what it saw
    struct Probe {
        seen: Arc<Mutex<Vec<(u64, (u32, u32))>>>,
    }

    impl FrameConsumer<HeadlessContext> for Probe {
        fn new_frame_ready(
            &mut self,
            input: <HeadlessContext as GpuContext>::Texture,
            _time: Timestamp,
            command_buffer: <HeadlessContext as GpuContext>::CommandBuffer,
        ) {
            self.seen.lock().unwrap().push((input.id(), input.size()));
            command_buffer.commit();
        }
    }

    fn input(context: &HeadlessContext, width: u32, height: u32) -> crate::gpu::headless::HeadlessTexture {
        context
            .allocate_texture(width, height, PixelFormat::Rgba8Unorm)
            .unwrap()
    }

    #[test]
    fn test_compute_dispatch_floors_tiles() {
        let context = Arc::new(HeadlessContext::new());
        let mut filter = Filter::new(
            Arc::clone(&context),
            "gray",
            FilterKind::compute(GRAYSCALE_COMPUTE),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let probe: ConsumerRef<HeadlessContext> = shared(Probe {
            seen: Arc::clone(&seen),
        });
        filter.add_target(probe);

        let frame = input(&context, 20, 17);
        filter.new_frame_ready(frame, Timestamp::ZERO, context.new_command_buffer());

        let committed = context.committed();
        assert_eq!(committed.len(), 1);
        match &committed[0].passes[0] {
            EncodedPass::Compute { threadgroups, .. } => assert_eq!(*threadgroups, [2, 2, 1]),
            other => panic!("unexpected pass {:?}", other),
        }
        assert_eq!(seen.lock().unwrap()[0].1, (20, 17));
    }

    #[test]
    fn test_render_filter_draws_quad() {
        let context = Arc::new(HeadlessContext::new());
        let mut filter = Filter::new(
            Arc::clone(&context),
            "pass",
            FilterKind::render(BASIC_VERTEX, BASIC_FRAGMENT, TextureRotation::None),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        filter.add_target(shared(Probe {
            seen: Arc::clone(&seen),
        }));

        filter.new_frame_ready(
            input(&context, 16, 16),
            Timestamp::ZERO,
            context.new_command_buffer(),
        );

        let committed = context.committed();
        match &committed[0].passes[0] {
            EncodedPass::Render {
                load, index_count, ..
            } => {
                assert_eq!(*load, LoadAction::DontCare);
                assert_eq!(*index_count, 6);
            }
            other => panic!("unexpected pass {:?}", other),
        }
    }

    #[test]
    fn test_missing_program_forwards_input() {
        let context = Arc::new(HeadlessContext::new());
        let mut filter = Filter::new(
            Arc::clone(&context),
            "missing",
            FilterKind::compute("does_not_exist"),
        );
        assert!(!filter.is_configured());

        let seen = Arc::new(Mutex::new(Vec::new()));
        filter.add_target(shared(Probe {
            seen: Arc::clone(&seen),
        }));

        let frame = input(&context, 8, 8);
        let frame_id = frame.id();
        filter.new_frame_ready(frame, Timestamp::ZERO, context.new_command_buffer());

        assert_eq!(seen.lock().unwrap()[0].0, frame_id);
        assert!(context.committed()[0].passes.is_empty());
        assert!(filter.output_texture().is_none());
    }

    #[test]
    fn test_allocation_failure_forwards_input() {
        let context = Arc::new(HeadlessContext::new());
        let mut filter = Filter::new(
            Arc::clone(&context),
            "gray",
            FilterKind::compute(GRAYSCALE_COMPUTE),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        filter.add_target(shared(Probe {
            seen: Arc::clone(&seen),
        }));

        let frame = input(&context, 8, 8);
        let frame_id = frame.id();
        context.set_fail_texture_allocation(true);
        filter.new_frame_ready(frame.clone(), Timestamp::ZERO, context.new_command_buffer());
        assert_eq!(seen.lock().unwrap()[0].0, frame_id);

        // Recovers once allocation works again
        context.set_fail_texture_allocation(false);
        filter.new_frame_ready(frame, Timestamp::from_millis(1), context.new_command_buffer());
        assert_ne!(seen.lock().unwrap()[1].0, frame_id);
    }
}
