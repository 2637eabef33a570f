// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the frame graph on the headless context

use frame_pipeline::filters::{FillMode, QUAD_VERTICES, grayscale, passthrough, sepia};
use frame_pipeline::gpu::headless::{EncodedPass, HeadlessCommandBuffer};
use frame_pipeline::gpu::{
    CommandBuffer, GpuContext, GpuTexture, HeadlessContext, LoadAction, PixelFormat,
};
use frame_pipeline::graph::{ConsumerRef, FrameConsumer, FrameSource, Timestamp, shared};
use frame_pipeline::handoff_queue::{HandoffQueue, lock_recovering};
use frame_pipeline::sinks::{DisplaySink, OffscreenSurface};
use frame_pipeline::sources::{CaptureSource, StaticImage, TestPattern};
use frame_pipeline::TextureRotation;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type Texture = <HeadlessContext as GpuContext>::Texture;

/// Terminal node remembering what it was given
#[derive(Default)]
struct Recorder {
    buffer_ids: Vec<u64>,
    times: Vec<Timestamp>,
    sizes: Vec<(u32, u32)>,
}

impl FrameConsumer<HeadlessContext> for Recorder {
    fn new_frame_ready(&mut self, input: Texture, time: Timestamp, command_buffer: HeadlessCommandBuffer) {
        self.buffer_ids.push(command_buffer.id());
        self.times.push(time);
        self.sizes.push(input.size());
        command_buffer.commit();
    }
}

fn solid(context: &HeadlessContext, width: u32, height: u32, rgba: [u8; 4]) -> Texture {
    let pixels: Vec<u8> = rgba.iter().copied().cycle().take((width * height * 4) as usize).collect();
    context
        .upload_texture(width, height, PixelFormat::Rgba8Unorm, &pixels, width * 4)
        .unwrap()
}

#[test]
fn test_handoff_queue_across_threads() {
    let queue = Arc::new(HandoffQueue::new());
    let producing = Arc::new(AtomicUsize::new(4));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let producing = Arc::clone(&producing);
            std::thread::spawn(move || {
                for i in 0..250 {
                    queue.enqueue(p * 1000 + i);
                }
                producing.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    // Consumers dequeue while producers are still enqueuing
    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let producing = Arc::clone(&producing);
            std::thread::spawn(move || {
                let mut taken = Vec::new();
                loop {
                    match queue.dequeue() {
                        Some(item) => taken.push(item),
                        None if producing.load(Ordering::SeqCst) == 0 && queue.is_empty() => break,
                        None => std::thread::yield_now(),
                    }
                }
                taken
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let taken: Vec<Vec<usize>> = consumers.into_iter().map(|c| c.join().unwrap()).collect();

    // Each consumer sees every producer's items in order
    for items in &taken {
        for p in 0..4 {
            let own: Vec<_> = items.iter().filter(|v| **v / 1000 == p).collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
    }

    let all: Vec<usize> = taken.into_iter().flatten().collect();
    let unique: HashSet<usize> = all.iter().copied().collect();
    assert_eq!(all.len(), 1000);
    assert_eq!(unique.len(), 1000);
    assert!((0..4).all(|p| (0..250).all(|i| unique.contains(&(p * 1000 + i)))));
    assert!(queue.is_empty());
}

#[test]
fn test_fan_out_reuses_first_buffer() {
    let context = Arc::new(HeadlessContext::new());
    let mut filter = grayscale(Arc::clone(&context));
    let recorders: Vec<_> = (0..3).map(|_| shared(Recorder::default())).collect();
    for recorder in &recorders {
        filter.add_target(recorder.clone() as ConsumerRef<HeadlessContext>);
    }

    let incoming = context.new_command_buffer();
    let incoming_id = incoming.id();
    filter.new_frame_ready(solid(&context, 8, 8, [10, 20, 30, 255]), Timestamp::from_millis(1), incoming);

    // One buffer from the caller plus one per extra target
    assert_eq!(context.stats().command_buffers_created, 3);
    assert_eq!(lock_recovering(&recorders[0]).buffer_ids, vec![incoming_id]);
    let second = lock_recovering(&recorders[1]).buffer_ids[0];
    let third = lock_recovering(&recorders[2]).buffer_ids[0];
    assert_ne!(second, incoming_id);
    assert_ne!(second, third);

    // Every branch carries the filter's pass
    for committed in context.committed() {
        assert_eq!(committed.passes.len(), 1);
    }
}

#[test]
fn test_filter_without_targets_drops_buffer() {
    let context = Arc::new(HeadlessContext::new());
    let mut filter = sepia(Arc::clone(&context), 0.5).0;
    filter.new_frame_ready(
        solid(&context, 8, 8, [1, 2, 3, 255]),
        Timestamp::ZERO,
        context.new_command_buffer(),
    );
    assert_eq!(context.stats().commits, 0);
}

#[test]
fn test_chain_into_display() {
    let context = Arc::new(HeadlessContext::new());
    let image = solid(&context, 16, 16, [200, 100, 50, 255]);
    let pixels = image.pixels();
    let mut source = StaticImage::from_rgba(Arc::clone(&context), 16, 16, &pixels).unwrap();

    let gray = shared(grayscale(Arc::clone(&context)));
    let display = shared(
        DisplaySink::new(
            Arc::clone(&context),
            OffscreenSurface::new(Arc::clone(&context), 16, 16),
            FillMode::Stretch,
        )
        .unwrap(),
    );
    lock_recovering(&gray).add_target(display.clone());
    source.add_target(gray.clone());

    source.process(Timestamp::from_millis(40));

    let display = lock_recovering(&display);
    let (drawable, time) = display.surface().last_presented().unwrap();
    assert_eq!(*time, Timestamp::from_millis(40));
    let out = drawable.pixels();
    // Gray output has equal channels
    assert_eq!(out[0], out[1]);
    assert_eq!(out[1], out[2]);
    assert_eq!(display.frames_presented(), 1);
}

#[test]
fn test_passthrough_is_a_render_stage() {
    let context = Arc::new(HeadlessContext::new());
    let mut filter = passthrough(Arc::clone(&context), TextureRotation::Left);
    let recorder = shared(Recorder::default());
    filter.add_target(recorder.clone());

    filter.new_frame_ready(
        solid(&context, 8, 4, [0, 0, 0, 255]),
        Timestamp::ZERO,
        context.new_command_buffer(),
    );
    assert_eq!(lock_recovering(&recorder).sizes, vec![(8, 4)]);
    let committed = context.committed();
    assert!(matches!(
        committed[0].passes[..],
        [EncodedPass::Render { load: LoadAction::DontCare, .. }]
    ));
}

#[test]
fn test_capture_broadcasts_to_each_target() {
    let context = Arc::new(HeadlessContext::new());
    let (mut source, handle) = CaptureSource::new(Arc::clone(&context));
    let first = shared(Recorder::default());
    let second = shared(Recorder::default());
    source.add_target(first.clone());
    source.add_target(second.clone());

    let pattern = TestPattern::new(32, 16, 30);
    assert!(handle.send_frame(pattern.frame(0)));
    source.tick();

    let a = lock_recovering(&first);
    let b = lock_recovering(&second);
    assert_eq!(a.sizes, vec![(32, 16)]);
    assert_ne!(a.buffer_ids, b.buffer_ids);
    assert_eq!(a.times, b.times);
}

#[test]
fn test_fill_wide_into_standard() {
    let fit = FillMode::AspectFit.convert(&QUAD_VERTICES, (1920, 1080), (640, 480));
    for (i, value) in fit.iter().enumerate() {
        let expected = if i % 2 == 0 { QUAD_VERTICES[i] } else { QUAD_VERTICES[i] * 0.75 };
        assert!((value - expected).abs() < 1e-6, "vertex {} = {}", i, value);
    }

    let fill = FillMode::AspectFill.convert(&QUAD_VERTICES, (1920, 1080), (640, 480));
    assert!((fill[0].abs() - 4.0 / 3.0).abs() < 1e-5);
    assert!((fill[1].abs() - 1.0).abs() < 1e-6);
}

#[test]
fn test_filter_output_allocated_once_per_size() {
    let context = Arc::new(HeadlessContext::new());
    let mut filter = grayscale(Arc::clone(&context));
    filter.add_target(shared(Recorder::default()));
    let input = solid(&context, 16, 8, [9, 9, 9, 255]);

    let mut ids = Vec::new();
    for ms in 0..5 {
        filter.new_frame_ready(input.clone(), Timestamp::from_millis(ms), context.new_command_buffer());
        ids.push(filter.output_texture().unwrap().id());
    }
    assert!(ids.iter().all(|id| *id == ids[0]));

    let larger = solid(&context, 32, 8, [9, 9, 9, 255]);
    filter.new_frame_ready(larger, Timestamp::from_millis(5), context.new_command_buffer());
    assert_ne!(filter.output_texture().unwrap().id(), ids[0]);
}
