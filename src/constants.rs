// SPDX-License-Identifier: GPL-3.0-only

//! Node-wide constants

use std::time::Duration;

/// Transport defaults (topic names and queue depths)
pub mod topics {
    /// Color image stream consumed by the topic bridge
    pub const RGB_IMAGE: &str = "/camera/rgb/image_raw";

    /// Depth image stream consumed by the topic bridge
    pub const DEPTH_IMAGE: &str = "/camera/depth/image_raw";

    /// Transform stream consumed by the topic-bridge pose source
    pub const POSE: &str = "/tf";

    /// Unindexed point cloud output
    pub const SCENE_POINT_CLOUD: &str = "/scene_point_cloud";

    /// Indexed mesh output
    pub const SCENE_MESH: &str = "/scene_mesh";

    /// Queue depth for each bridge subscription
    pub const SUBSCRIBER_QUEUE_DEPTH: usize = 10;

    /// Queue depth for point cloud / mesh publishers
    pub const PUBLISHER_QUEUE_DEPTH: usize = 5;

    /// Pending control requests before callers wait
    pub const CONTROL_QUEUE_DEPTH: usize = 8;

    /// Reference frame stamped on output messages
    pub const CAMERA_FRAME_ID: &str = "sr300_depth_optical_frame";
}

/// Reconstruction volume defaults
pub mod scene {
    /// Near plane of the view frustum (meters)
    pub const VIEW_FRUSTUM_MIN: f32 = 0.35;

    /// Far plane of the view frustum (meters)
    pub const VIEW_FRUSTUM_MAX: f32 = 3.0;

    /// Triangle capacity of the mesh buffer
    pub const MAX_TRIANGLES: usize = 1_000_000;

    /// Neighboring depth samples further apart than this are not joined (meters)
    pub const DEPTH_DISCONTINUITY_THRESHOLD: f32 = 0.1;
}

/// Calibration defaults
pub mod calibration {
    /// Default intrinsic image size when no calibration file is readable
    pub const DEFAULT_IMAGE_SIZE: (u32, u32) = (640, 480);

    /// Default focal length (pixels)
    pub const DEFAULT_FOCAL: f32 = 580.0;

    /// Depth scale applied when no disparity calibration is supplied (raw millimeters)
    pub const AFFINE_MM_SCALE: f32 = 1.0 / 1000.0;

    /// Kinect disparity transform constants
    pub const KINECT_DISPARITY_A: f32 = 1135.09;
    pub const KINECT_DISPARITY_B: f32 = 0.081_914_1;
}

/// File-pair reader with IMU data
pub mod raw_reader {
    /// Internal frame size of the IMU-augmented reader
    pub const FRAME_SIZE: (u32, u32) = (320, 240);

    /// Down-scaling factor applied to every frame read from disk
    pub const DOWNSCALE: f32 = 0.5;
}

/// Live device probing
pub mod devices {
    /// Depth sensor size reported by the structured-light sensor
    pub const STRUCTURED_LIGHT_DEPTH_SIZE: (u32, u32) = (640, 480);

    /// V4L2 drivers serving generic UVC depth cameras
    pub const UVC_DRIVERS: &[&str] = &["uvcvideo"];

    /// 16-bit depth FourCCs exposed by UVC depth cameras
    pub const UVC_DEPTH_FOURCCS: &[&[u8; 4]] = &[b"Z16 ", b"Y16 "];

    /// Kernel drivers for vendor depth sensors
    pub const VENDOR_DEPTH_DRIVERS: &[&str] = &["gspca_kinect", "kinect"];

    /// 10-bit packed depth FourCC used by vendor kernel drivers
    pub const VENDOR_DEPTH_FOURCC: &[u8; 4] = b"Y10B";

    /// Number of memory-mapped capture buffers
    pub const CAPTURE_BUFFERS: u32 = 4;
}

/// Output file defaults
pub mod output {
    /// Directory receiving exported meshes
    pub const OUTPUT_DIR: &str = "./Files/Out";

    /// Timestamp format used in exported file stems
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%.3f";

    /// Suffixes tried when an export stem is already taken
    pub const MAX_STEM_SUFFIX: u32 = 1000;

    /// Config directory name under the user's config dir
    pub const CONFIG_DIR_NAME: &str = "fusion-node";

    /// Config file name
    pub const CONFIG_FILE_NAME: &str = "config.json";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Sleep between polls when the source has no new frame yet
    pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Back-off after a failed device read
    pub const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);
}

/// Build information
pub mod app_info {
    /// Version embedded at build time (`git describe` or `FUSION_NODE_VERSION`)
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
