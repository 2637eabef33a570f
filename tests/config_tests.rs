// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use frame_pipeline::{BackpressurePolicy, Config, FillMode};
use std::path::PathBuf;

fn temp_config_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("frame-pipeline-test-{}-{}", name, std::process::id()))
        .join("config.json")
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.fill_mode, FillMode::AspectFit);
    assert_eq!(config.backpressure, BackpressurePolicy::FinishStream);
    assert!(config.audio_enabled);
    assert!(config.width > 0 && config.height > 0);
}

#[test]
fn test_missing_file_gives_defaults() {
    let path = temp_config_path("missing");
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_save_and_load() {
    let path = temp_config_path("save");
    let config = Config {
        width: 640,
        height: 480,
        fill_mode: FillMode::AspectFill,
        backpressure: BackpressurePolicy::Pause,
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_partial_file_fills_defaults() {
    let path = temp_config_path("partial");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "width": 320 }"#).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.width, 320);
    assert_eq!(config.height, Config::default().height);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_movie_settings_follow_config() {
    let config = Config {
        width: 800,
        height: 600,
        pool_size: 3,
        ..Config::default()
    };
    let settings = config.movie_settings();
    assert_eq!((settings.width, settings.height), (800, 600));
    assert_eq!(settings.pool_size, 3);
    assert_eq!(config.writer_settings().width, 800);
}
