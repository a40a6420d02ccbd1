// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use fusion_node::constants::{calibration, devices, raw_reader, timing, topics};

#[test]
fn test_topics_are_absolute() {
    for topic in [
        topics::RGB_IMAGE,
        topics::DEPTH_IMAGE,
        topics::POSE,
        topics::SCENE_POINT_CLOUD,
        topics::SCENE_MESH,
    ] {
        assert!(
            fusion_node::transport::validate_topic(topic).is_ok(),
            "{} should be a valid topic",
            topic
        );
    }
}

#[test]
fn test_raw_reader_frame_size() {
    assert_eq!(raw_reader::FRAME_SIZE, (320, 240));
    assert_eq!(raw_reader::DOWNSCALE, 0.5);
}

#[test]
fn test_millimeter_scale() {
    assert_eq!(calibration::AFFINE_MM_SCALE, 0.001);
}

#[test]
fn test_device_fourccs_are_four_bytes() {
    assert!(devices::UVC_DEPTH_FOURCCS.iter().all(|f| f.len() == 4));
    assert_eq!(devices::VENDOR_DEPTH_FOURCC, b"Y10B");
}

#[test]
fn test_idle_poll_is_short() {
    assert!(timing::IDLE_POLL_INTERVAL.as_millis() < 100);
    assert!(timing::FRAME_LOG_INTERVAL > 0);
}
