// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Recording a movie from an image, a movie file or the test pattern
//! - Listing encoders and GPU programs
//! - Running the graph headless

use chrono::Local;
use clap::{Args, ValueEnum};
use frame_pipeline::config::Config;
use frame_pipeline::constants::recording::FILE_PREFIX;
use frame_pipeline::constants::timing::FINALIZE_TIMEOUT;
use frame_pipeline::constants::BackpressurePolicy;
use frame_pipeline::errors::RecordingError;
use frame_pipeline::filters::{FillMode, Filter, TextureRotation, grayscale, passthrough, sepia};
use frame_pipeline::gpu::{GpuContext, HeadlessContext, WgpuContext};
use frame_pipeline::graph::{ConsumerRef, FrameSource, LoopAction, TickLoop, Timestamp, shared};
use frame_pipeline::handoff_queue::lock_recovering;
use frame_pipeline::media::encoders::{VideoCodec, detect_encoders};
use frame_pipeline::pipelines::video::{GstMovieWriter, MovieSink, WriterStatus};
use frame_pipeline::shaders::ProgramLibrary;
use frame_pipeline::sinks::{DisplaySink, OffscreenSurface};
use frame_pipeline::sources::{
    CaptureSource, MovieFileSource, PlaybackMode, StaticImage, TestPattern, spawn_display_link,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Stage<C> = Arc<Mutex<Filter<C>>>;

/// Preview drawables are this fraction of the movie size
const PREVIEW_SCALE: u32 = 4;

/// One `--filter` argument
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    Grayscale,
    Sepia(f32),
    Passthrough(TextureRotation),
}

impl FromStr for FilterSpec {
    type Err = String;

    /// `grayscale`, `sepia[:intensity]` or `passthrough[:rotation]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s, None),
        };
        match (name.to_ascii_lowercase().as_str(), arg) {
            ("grayscale", None) => Ok(FilterSpec::Grayscale),
            ("sepia", None) => Ok(FilterSpec::Sepia(1.0)),
            ("sepia", Some(value)) => value
                .parse::<f32>()
                .map(FilterSpec::Sepia)
                .map_err(|_| format!("Invalid sepia intensity '{}'", value)),
            ("passthrough", None) => Ok(FilterSpec::Passthrough(TextureRotation::None)),
            ("passthrough", Some(value)) => TextureRotation::parse(value)
                .map(FilterSpec::Passthrough)
                .ok_or_else(|| format!("Unknown rotation '{}'", value)),
            _ => Err(format!("Unknown filter '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FillArg {
    Stretch,
    AspectFit,
    AspectFill,
}

impl From<FillArg> for FillMode {
    fn from(arg: FillArg) -> Self {
        match arg {
            FillArg::Stretch => FillMode::Stretch,
            FillArg::AspectFit => FillMode::AspectFit,
            FillArg::AspectFill => FillMode::AspectFill,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PlaybackArg {
    /// Decode as fast as the graph consumes frames
    Fast,
    Actual,
    Loop,
}

impl From<PlaybackArg> for PlaybackMode {
    fn from(arg: PlaybackArg) -> Self {
        match arg {
            PlaybackArg::Fast => PlaybackMode::AsFastAsPossible,
            PlaybackArg::Actual => PlaybackMode::ActualSpeed,
            PlaybackArg::Loop => PlaybackMode::ActualSpeedLooping,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackpressureArg {
    FinishStream,
    Pause,
}

impl From<BackpressureArg> for BackpressurePolicy {
    fn from(arg: BackpressureArg) -> Self {
        match arg {
            BackpressureArg::FinishStream => BackpressurePolicy::FinishStream,
            BackpressureArg::Pause => BackpressurePolicy::Pause,
        }
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = w.parse::<u32>().map_err(|e| e.to_string())?;
    let height = h.parse::<u32>().map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err("Size must be non-zero".to_string());
    }
    Ok((width, height))
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Still image to record
    #[arg(long, conflicts_with = "movie")]
    image: Option<PathBuf>,

    /// Movie file to re-encode
    #[arg(long)]
    movie: Option<PathBuf>,

    /// Movie file playback speed
    #[arg(long, value_enum, default_value = "actual")]
    playback: PlaybackArg,

    /// Filter stage, repeatable: grayscale, sepia[:intensity], passthrough[:rotation]
    #[arg(short, long = "filter")]
    filters: Vec<FilterSpec>,

    /// Recording duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Output file path (default: ~/Videos/Recordings/recording_TIMESTAMP.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Movie size, e.g. 1920x1080
    #[arg(long, value_parser = parse_size)]
    size: Option<(u32, u32)>,

    #[arg(long, value_enum)]
    fill_mode: Option<FillArg>,

    #[arg(long, value_enum)]
    backpressure: Option<BackpressureArg>,

    /// Restrict the encoder to av1, hevc or h264
    #[arg(long)]
    codec: Option<String>,

    /// Add a sine tone (Hz) to the test pattern
    #[arg(long, num_args = 0..=1, default_missing_value = "440")]
    tone: Option<f32>,

    /// Record without audio
    #[arg(long)]
    no_audio: bool,

    /// Also render into an offscreen preview
    #[arg(long)]
    preview: bool,
}

#[derive(Debug, Args)]
pub struct DryRunArgs {
    /// Frames to push through the graph
    #[arg(long, default_value = "30")]
    frames: u64,

    /// Filter stage, repeatable
    #[arg(short, long = "filter")]
    filters: Vec<FilterSpec>,

    /// Display branches fed by the last stage
    #[arg(long, default_value = "2")]
    branches: usize,

    #[arg(long, value_parser = parse_size, default_value = "320x180")]
    size: (u32, u32),
}

pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn build_filters<C: GpuContext>(context: &Arc<C>, specs: &[FilterSpec]) -> Vec<Stage<C>> {
    specs
        .iter()
        .map(|spec| {
            shared(match spec {
                FilterSpec::Grayscale => grayscale(Arc::clone(context)),
                FilterSpec::Sepia(intensity) => sepia(Arc::clone(context), *intensity).0,
                FilterSpec::Passthrough(rotation) => passthrough(Arc::clone(context), *rotation),
            })
        })
        .collect()
}

/// Chain `stages` and feed `sinks` from the last one
///
/// Returns the consumers the source should target.
fn connect<C: GpuContext>(stages: &[Stage<C>], sinks: Vec<ConsumerRef<C>>) -> Vec<ConsumerRef<C>> {
    let Some((last, _)) = stages.split_last() else {
        return sinks;
    };
    for pair in stages.windows(2) {
        lock_recovering(&pair[0]).add_target(pair[1].clone());
    }
    let mut last = lock_recovering(last);
    for sink in sinks {
        last.add_target(sink);
    }
    vec![stages[0].clone() as ConsumerRef<C>]
}

fn default_output_path(config: &Config) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    config.recordings_dir().join(format!(
        "{}_{}.{}",
        FILE_PREFIX,
        timestamp,
        config.container.extension()
    ))
}

/// Record a movie
pub fn record(mut config: Config, args: RecordArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some((width, height)) = args.size {
        config.width = width;
        config.height = height;
    }
    if let Some(fill_mode) = args.fill_mode {
        config.fill_mode = fill_mode.into();
    }
    if let Some(backpressure) = args.backpressure {
        config.backpressure = backpressure.into();
    }
    if let Some(codec) = &args.codec {
        config.codec_preference =
            Some(VideoCodec::parse(codec).ok_or_else(|| format!("Unknown codec '{}'", codec))?);
    }
    if args.no_audio {
        config.audio_enabled = false;
    }

    gstreamer::init()?;
    let context = Arc::new(WgpuContext::new(config.gpu_preference)?);
    println!("GPU: {} ({:?})", context.info().adapter_name, context.info().backend);

    let output_path = args.output.clone().unwrap_or_else(|| default_output_path(&config));
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let writer = Arc::new(GstMovieWriter::new(&output_path, config.writer_settings()));
    let sink = shared(MovieSink::new(
        Arc::clone(&context),
        Arc::clone(&writer),
        config.movie_settings(),
    )?);
    let control = lock_recovering(&sink).control();

    let mut sinks: Vec<ConsumerRef<WgpuContext>> = vec![sink as ConsumerRef<WgpuContext>];
    let preview = if args.preview {
        let surface = OffscreenSurface::new(
            Arc::clone(&context),
            (config.width / PREVIEW_SCALE).max(1),
            (config.height / PREVIEW_SCALE).max(1),
        );
        let display = shared(DisplaySink::new(Arc::clone(&context), surface, config.fill_mode)?);
        sinks.push(display.clone() as ConsumerRef<WgpuContext>);
        Some(display)
    } else {
        None
    };

    let stages = build_filters(&context, &args.filters);
    let heads = connect(&stages, sinks);

    let fps = config.framerate.max(1);
    let interval = Duration::from_nanos(1_000_000_000 / fps as u64);
    let mut loops: Vec<TickLoop> = Vec::new();
    let mut movie_source: Option<MovieFileSource> = None;

    if let Some(path) = &args.image {
        let mut image = StaticImage::open(Arc::clone(&context), path)?;
        for head in heads {
            image.add_target(head);
        }
        control.start()?;

        let mut index = 0u64;
        loops.push(TickLoop::start("image-link", Some(interval), move || {
            image.process(Timestamp::from_frame(index, fps));
            index += 1;
            LoopAction::Continue
        }));
    } else {
        let (mut capture, handle) = CaptureSource::new(Arc::clone(&context));
        for head in heads {
            capture.add_target(head);
        }

        if let Some(path) = &args.movie {
            let mode = args.playback.into();
            let audio = config.audio_enabled.then_some(config.audio_format);
            let movie = MovieFileSource::open(path, mode, handle, audio)?;
            if movie.has_audio() {
                capture.attach_audio_target(Arc::new(control.clone()));
            }
            let (width, height) = movie.dimensions();
            println!("Source: {} ({}x{})", path.display(), width, height);
            movie_source = Some(movie);
        } else {
            let mut pattern = TestPattern::new(config.width, config.height, fps);
            if let Some(frequency) = args.tone
                && config.audio_enabled
            {
                pattern = pattern.with_tone(frequency, config.audio_format);
                capture.attach_audio_target(Arc::new(control.clone()));
            }
            println!("Source: test pattern");
            loops.push(pattern.spawn(handle, None));
        }

        control.start()?;
        loops.push(spawn_display_link(shared(capture), interval));
    }

    println!("Output: {}", output_path.display());
    println!("Duration: {} seconds", args.duration);
    println!();
    println!("Recording... (press Ctrl+C to stop early)");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(args.duration);
    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        if !loops.iter().any(TickLoop::is_running) {
            println!();
            println!("Source finished");
            break;
        }
        if control.writer_status().is_failed() {
            break;
        }

        let elapsed = start.elapsed().as_secs();
        let stats = control.stats();
        print!(
            "\rRecording: {:02}:{:02}  frames: {}",
            elapsed / 60,
            elapsed % 60,
            stats.video_appended
        );
        std::io::Write::flush(&mut std::io::stdout())?;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    control.stop(move || {
        let _ = done_tx.send(());
    });
    for mut ticks in loops {
        ticks.stop();
    }
    drop(movie_source);

    if done_rx
        .recv_timeout(FINALIZE_TIMEOUT + Duration::from_secs(1))
        .is_err()
    {
        println!("Timed out waiting for the movie to finalize");
    }

    let stats = control.stats();
    println!(
        "Video: {} written, {} duplicate, {} pool exhausted, {} refused, {} GPU errors",
        stats.video_appended,
        stats.video_dropped_duplicate,
        stats.video_dropped_pool_exhausted,
        stats.video_dropped_refused,
        stats.video_dropped_gpu
    );
    if control.is_audio_enabled() {
        println!(
            "Audio: {} written, {} dropped",
            stats.audio_appended, stats.audio_dropped
        );
    }
    if let Some(display) = preview {
        println!(
            "Preview: {} frames presented",
            lock_recovering(&display).surface().presented_count()
        );
    }

    match control.writer_status() {
        WriterStatus::Failed(msg) => Err(RecordingError::WriterFailed(msg).into()),
        status => {
            println!("Movie saved: {} ({:?})", writer.output_path().display(), status);
            Ok(())
        }
    }
}

/// List available encoders
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;
    let report = detect_encoders();

    if report.video.is_empty() {
        println!("No video encoders found.");
    } else {
        println!("Video encoders (selection order):");
        for info in &report.video {
            println!(
                "  {:<14} {:<22} {:?}{}",
                info.element_name,
                info.display_name,
                info.codec,
                if info.is_hardware { "  [HW]" } else { "" }
            );
        }
    }
    println!();

    if report.audio.is_empty() {
        println!("No audio encoders found.");
    } else {
        println!("Audio encoders: {}", report.audio.join(", "));
    }
    Ok(())
}

/// List bundled GPU programs
pub fn list_programs() -> Result<(), Box<dyn std::error::Error>> {
    let library = ProgramLibrary::with_builtins();
    println!("Bundled programs:");
    for (name, stage) in library.entries() {
        println!("  {:<22} {:?}", name, stage);
    }
    Ok(())
}

/// Push the test pattern through the graph on the headless context
pub fn dry_run(args: DryRunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (width, height) = args.size;
    let context = Arc::new(HeadlessContext::new());
    let (mut source, handle) = CaptureSource::new(Arc::clone(&context));

    let mut displays = Vec::with_capacity(args.branches);
    for _ in 0..args.branches {
        let surface = OffscreenSurface::new(Arc::clone(&context), width, height);
        displays.push(shared(DisplaySink::new(
            Arc::clone(&context),
            surface,
            FillMode::AspectFit,
        )?));
    }
    let sinks: Vec<ConsumerRef<HeadlessContext>> = displays
        .iter()
        .map(|d| d.clone() as ConsumerRef<HeadlessContext>)
        .collect();

    let stages = build_filters(&context, &args.filters);
    for head in connect(&stages, sinks) {
        source.add_target(head);
    }

    let pattern = TestPattern::new(width, height, 30);
    for index in 0..args.frames {
        handle.send_frame(pattern.frame(index));
        source.tick();
    }

    let stats = context.stats();
    println!("Frames:           {}", args.frames);
    println!("Stages:           {}", stages.len());
    println!("Branches:         {}", args.branches);
    println!("Command buffers:  {}", stats.command_buffers_created);
    println!("Commits:          {}", stats.commits);
    println!("Textures:         {}", stats.textures_allocated);
    println!("Programs:         {}", stats.programs_compiled);
    for (i, display) in displays.iter().enumerate() {
        println!(
            "Branch {} presented {} frames",
            i,
            lock_recovering(display).surface().presented_count()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_spec_parsing() {
        assert_eq!("grayscale".parse::<FilterSpec>(), Ok(FilterSpec::Grayscale));
        assert_eq!("sepia:0.5".parse::<FilterSpec>(), Ok(FilterSpec::Sepia(0.5)));
        assert_eq!(
            "passthrough:left".parse::<FilterSpec>(),
            Ok(FilterSpec::Passthrough(TextureRotation::Left))
        );
        assert!("sepia:strong".parse::<FilterSpec>().is_err());
        assert!("blur".parse::<FilterSpec>().is_err());
    }

    #[test]
    fn test_size_parsing() {
        assert_eq!(parse_size("1920x1080"), Ok((1920, 1080)));
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("1920").is_err());
    }

    #[test]
    fn test_connect_chains_stages() {
        let context = Arc::new(HeadlessContext::new());
        let stages = build_filters(&context, &[FilterSpec::Grayscale, FilterSpec::Sepia(0.3)]);
        let surface = OffscreenSurface::new(Arc::clone(&context), 4, 4);
        let display = shared(DisplaySink::new(Arc::clone(&context), surface, FillMode::Stretch).unwrap());
        let heads = connect(&stages, vec![display as ConsumerRef<HeadlessContext>]);

        assert_eq!(heads.len(), 1);
        assert_eq!(lock_recovering(&stages[0]).targets().len(), 1);
        assert_eq!(lock_recovering(&stages[1]).targets().len(), 1);
    }
}
