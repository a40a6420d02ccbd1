// SPDX-License-Identifier: GPL-3.0-only

//! Node configuration
//!
//! Loaded from a JSON file; every key is optional and falls back to the
//! defaults in [`crate::constants`].

use crate::constants::{output, scene, topics};
use crate::engine::EngineSettings;
use crate::errors::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Color image topic for the topic bridge
    pub rgb_image_topic: String,
    /// Depth image topic for the topic bridge
    pub depth_image_topic: String,
    /// Transform topic for the topic-bridge pose source
    pub pose_topic: String,
    /// Topic receiving the unindexed point cloud
    pub scene_point_cloud: String,
    /// Topic receiving the indexed mesh
    pub scene_mesh: String,
    /// Queue depth of each bridge subscription
    pub subscriber_queue_depth: usize,
    /// Queue depth of the output publishers
    pub publisher_queue_depth: usize,
    /// Write STL + OBJ files on every publish
    pub save_cloud_to_file_system: bool,
    /// Also write the point cloud as LAS
    pub save_point_cloud_las: bool,
    /// Publish the point cloud message
    pub publish_point_cloud: bool,
    /// Publish the mesh message
    pub publish_mesh: bool,
    /// Near plane of the view frustum (meters)
    pub view_frustum_min: f32,
    /// Far plane of the view frustum (meters)
    pub view_frustum_max: f32,
    /// Frame id stamped on outputs; also the child frame the pose bridge tracks
    pub camera_frame_id: String,
    /// Directory receiving exported files
    pub output_dir: PathBuf,
    /// Triangle capacity handed to the engine
    pub max_triangles: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rgb_image_topic: topics::RGB_IMAGE.to_string(),
            depth_image_topic: topics::DEPTH_IMAGE.to_string(),
            pose_topic: topics::POSE.to_string(),
            scene_point_cloud: topics::SCENE_POINT_CLOUD.to_string(),
            scene_mesh: topics::SCENE_MESH.to_string(),
            subscriber_queue_depth: topics::SUBSCRIBER_QUEUE_DEPTH,
            publisher_queue_depth: topics::PUBLISHER_QUEUE_DEPTH,
            save_cloud_to_file_system: true,
            save_point_cloud_las: false,
            publish_point_cloud: false,
            publish_mesh: false,
            view_frustum_min: scene::VIEW_FRUSTUM_MIN,
            view_frustum_max: scene::VIEW_FRUSTUM_MAX,
            camera_frame_id: topics::CAMERA_FRAME_ID.to_string(),
            output_dir: PathBuf::from(output::OUTPUT_DIR),
            max_triangles: scene::MAX_TRIANGLES,
        }
    }
}

impl NodeConfig {
    /// Default config file location (`~/.config/fusion-node/config.json` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(output::CONFIG_DIR_NAME)
                .join(output::CONFIG_FILE_NAME)
        })
    }

    /// Load config from a JSON file, falling back to defaults if it is missing
    pub fn load(path: &Path) -> NodeResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> NodeResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the node cannot run with
    pub fn validate(&self) -> NodeResult<()> {
        if !(self.view_frustum_min > 0.0 && self.view_frustum_min < self.view_frustum_max) {
            return Err(NodeError::Config(format!(
                "view frustum must satisfy 0 < min < max (got {} .. {})",
                self.view_frustum_min, self.view_frustum_max
            )));
        }
        if self.camera_frame_id.trim().is_empty() {
            return Err(NodeError::Config("camera_frame_id is empty".to_string()));
        }
        if self.subscriber_queue_depth == 0 || self.publisher_queue_depth == 0 {
            return Err(NodeError::Config("queue depths must be non-zero".to_string()));
        }
        if self.max_triangles == 0 {
            return Err(NodeError::Config("max_triangles must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Engine settings derived from this config
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            view_frustum_min: self.view_frustum_min,
            view_frustum_max: self.view_frustum_max,
            max_triangles: self.max_triangles,
        }
    }
}
