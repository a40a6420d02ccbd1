// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use fusion_node::NodeConfig;
use fusion_node::errors::NodeError;
use std::path::PathBuf;

#[test]
fn test_config_defaults() {
    let config = NodeConfig::default();

    assert_eq!(config.rgb_image_topic, "/camera/rgb/image_raw");
    assert_eq!(config.depth_image_topic, "/camera/depth/image_raw");
    assert_eq!(config.scene_point_cloud, "/scene_point_cloud");
    assert_eq!(config.scene_mesh, "/scene_mesh");
    assert_eq!(config.camera_frame_id, "sr300_depth_optical_frame");
    assert_eq!(config.output_dir, PathBuf::from("./Files/Out"));
    assert!(config.save_cloud_to_file_system);
    assert!(!config.publish_point_cloud);
    assert!(!config.publish_mesh);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_engine_settings_follow_frustum() {
    let config = NodeConfig::from_json(
        r#"{ "view_frustum_min": 0.2, "view_frustum_max": 5.0, "max_triangles": 64 }"#,
    )
    .unwrap();
    let settings = config.engine_settings();

    assert_eq!(settings.view_frustum_min, 0.2);
    assert_eq!(settings.view_frustum_max, 5.0);
    assert_eq!(settings.max_triangles, 64);
}

#[test]
fn test_config_rejects_invalid_values() {
    for json in [
        r#"{ "view_frustum_min": 0.0 }"#,
        r#"{ "camera_frame_id": "  " }"#,
        r#"{ "subscriber_queue_depth": 0 }"#,
        r#"{ "publish_mesh": "yes" }"#,
    ] {
        assert!(
            matches!(NodeConfig::from_json(json), Err(NodeError::Config(_))),
            "{} should be rejected",
            json
        );
    }
}

#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("fusion-node-{}.json", uuid::Uuid::new_v4()));
    let config = NodeConfig {
        publish_mesh: true,
        scene_mesh: "/reconstruction/mesh".to_string(),
        ..Default::default()
    };
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = NodeConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, config);
}

#[test]
fn test_default_path_is_under_config_dir() {
    if let Some(path) = NodeConfig::default_path() {
        assert!(path.ends_with("fusion-node/config.json"));
    }
}
