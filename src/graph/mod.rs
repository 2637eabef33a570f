// SPDX-License-Identifier: GPL-3.0-only

//! Frame graph
//!
//! A graph is built from nodes with two capabilities:
//! - [`FrameSource`]: produces one texture per tick and pushes it to an
//!   ordered list of downstream targets.
//! - [`FrameConsumer`]: receives a texture, its timestamp and the command
//!   buffer the upstream work was encoded into.
//!
//! Filters implement both. Sources without an input (images, capture) give
//! every target its own command buffer. Nodes with an input relay downstream
//! through [`Targets::relay`]: the first target continues on the buffer the
//! node received, every later target starts on a fresh buffer. Nodes never
//! commit; terminal consumers (display and movie sinks) do.

mod tick_loop;

pub use tick_loop::{LoopAction, TickLoop};

use crate::gpu::GpuContext;
use crate::handoff_queue::lock_recovering;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

/// Presentation time in nanoseconds
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis * 1_000_000)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Timestamp(duration.as_nanos().min(u64::MAX as u128) as u64)
    }

    /// Timestamp of frame `index` at `fps` frames per second
    pub fn from_frame(index: u64, fps: u32) -> Self {
        let fps = fps.max(1) as u64;
        Timestamp(index * 1_000_000_000 / fps)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        Timestamp(
            self.0
                .saturating_add(duration.as_nanos().min(u64::MAX as u128) as u64),
        )
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// A node that accepts frames
pub trait FrameConsumer<C: GpuContext>: Send {
    /// Called once per tick with the upstream output
    ///
    /// `input` stays valid until the producer's next tick. The consumer owns
    /// `command_buffer`: it either encodes into it and passes it on, or
    /// commits it.
    fn new_frame_ready(
        &mut self,
        input: C::Texture,
        time: Timestamp,
        command_buffer: C::CommandBuffer,
    );
}

/// Shared reference to a downstream node
pub type ConsumerRef<C> = Arc<Mutex<dyn FrameConsumer<C>>>;

/// Wrap a node so it can be added as a target and still be reached by its owner
pub fn shared<T>(node: T) -> Arc<Mutex<T>> {
    Arc::new(Mutex::new(node))
}

/// Ordered downstream targets of a node
pub struct Targets<C: GpuContext> {
    targets: Vec<ConsumerRef<C>>,
}

impl<C: GpuContext> Targets<C> {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
        }
    }

    pub fn push(&mut self, target: ConsumerRef<C>) {
        self.targets.push(target);
    }

    /// Remove a target by identity, returning whether it was present
    pub fn remove(&mut self, target: &ConsumerRef<C>) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| !Arc::ptr_eq(t, target));
        before != self.targets.len()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Relay a node's output downstream
    ///
    /// `encode` records the node's work into a command buffer and returns
    /// the texture to hand on. It runs on `command_buffer` for the first
    /// target; for each later target a new buffer is obtained from `context`
    /// and the work is encoded into it again, so every branch carries the
    /// full upstream work and commits on its own schedule. With no targets
    /// nothing is encoded and the buffer is dropped uncommitted.
    pub fn relay(
        &self,
        context: &C,
        command_buffer: C::CommandBuffer,
        time: Timestamp,
        mut encode: impl FnMut(&mut C::CommandBuffer) -> C::Texture,
    ) {
        let Some((first, rest)) = self.targets.split_first() else {
            trace!("No targets, dropping command buffer");
            return;
        };

        let mut command_buffer = command_buffer;
        let output = encode(&mut command_buffer);
        deliver(first, output, time, command_buffer);

        for target in rest {
            let mut branch = context.new_command_buffer();
            let output = encode(&mut branch);
            deliver(target, output, time, branch);
        }
    }

    /// Dispatch a source's texture, giving every target a fresh command buffer
    pub fn broadcast(&self, context: &C, texture: &C::Texture, time: Timestamp) {
        for target in &self.targets {
            deliver(target, texture.clone(), time, context.new_command_buffer());
        }
    }
}

impl<C: GpuContext> Default for Targets<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<C: GpuContext>(
    target: &ConsumerRef<C>,
    input: C::Texture,
    time: Timestamp,
    command_buffer: C::CommandBuffer,
) {
    lock_recovering(target).new_frame_ready(input, time, command_buffer);
}

/// A node that pushes frames to targets
pub trait FrameSource<C: GpuContext> {
    fn targets(&self) -> &Targets<C>;

    fn targets_mut(&mut self) -> &mut Targets<C>;

    fn add_target(&mut self, target: ConsumerRef<C>) {
        self.targets_mut().push(target);
    }

    fn remove_target(&mut self, target: &ConsumerRef<C>) -> bool {
        self.targets_mut().remove(target)
    }

    fn remove_all_targets(&mut self) {
        self.targets_mut().clear();
    }
}
