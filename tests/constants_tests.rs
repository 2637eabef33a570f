// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use frame_pipeline::constants::{BackpressurePolicy, BitratePreset, format_bitrate};

#[test]
fn test_bitrate_preset_values() {
    assert_eq!(BitratePreset::ALL.len(), 3);
}

#[test]
fn test_bitrate_preset_ordering() {
    // Presets are ordered from lowest to highest quality
    let mut prev_bitrate = 0u32;
    for preset in BitratePreset::ALL {
        let bitrate = preset.bitrate_kbps(1920);
        assert!(
            bitrate >= prev_bitrate,
            "Presets should be ordered from lowest to highest"
        );
        prev_bitrate = bitrate;
    }
}

#[test]
fn test_bitrate_scales_with_width() {
    let hd_bitrate = BitratePreset::Medium.bitrate_kbps(1280);
    let fhd_bitrate = BitratePreset::Medium.bitrate_kbps(1920);
    let uhd_bitrate = BitratePreset::Medium.bitrate_kbps(3840);

    assert!(hd_bitrate < fhd_bitrate);
    assert!(fhd_bitrate < uhd_bitrate);
}

#[test]
fn test_format_bitrate() {
    assert_eq!(format_bitrate(8_000), "8 Mbps");
    assert_eq!(format_bitrate(2_500), "2.5 Mbps");
}

#[test]
fn test_backpressure_default_finishes_stream() {
    assert_eq!(BackpressurePolicy::default(), BackpressurePolicy::FinishStream);
    for policy in BackpressurePolicy::ALL {
        assert!(!policy.display_name().is_empty());
    }
}
