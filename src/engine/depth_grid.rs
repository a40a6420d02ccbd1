// SPDX-License-Identifier: GPL-3.0-only

//! Single-view grid engine
//!
//! Keeps only the latest depth frame. Meshing unprojects it through the
//! depth intrinsics, joins neighboring samples into two triangles per
//! pixel quad, and moves the result into the world frame with the current
//! tracked pose.

use super::{EngineFactory, EngineSettings, Pose, ReconstructionEngine};
use crate::backends::source::{ImageSize, ImuMeasurement, RgbdFrame};
use crate::calibration::{CalibrationProfile, DisparityCalib, Intrinsics};
use crate::constants::scene::DEPTH_DISCONTINUITY_THRESHOLD;
use crate::errors::{EngineError, EngineResult};
use crate::pipelines::mesh::{MeshBuffer, Triangle, Vec3};
use tracing::{debug, info, warn};

/// Builds [`DepthGridEngine`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthGridFactory;

impl EngineFactory for DepthGridFactory {
    fn construct(
        &self,
        settings: &EngineSettings,
        calibration: &CalibrationProfile,
        rgb_size: ImageSize,
        depth_size: ImageSize,
    ) -> EngineResult<Box<dyn ReconstructionEngine>> {
        Ok(Box::new(DepthGridEngine::new(
            *settings,
            calibration,
            rgb_size,
            depth_size,
        )?))
    }
}

pub struct DepthGridEngine {
    settings: EngineSettings,
    intrinsics: Intrinsics,
    disparity: DisparityCalib,
    depth_size: ImageSize,
    /// Latest depth in meters, `-1.0` where invalid
    depth_meters: Vec<f32>,
    pose: Pose,
    mesh: MeshBuffer,
    frames: u64,
}

impl DepthGridEngine {
    pub fn new(
        settings: EngineSettings,
        calibration: &CalibrationProfile,
        rgb_size: ImageSize,
        depth_size: ImageSize,
    ) -> EngineResult<Self> {
        if !depth_size.is_valid() || depth_size.height == 0 {
            return Err(EngineError::ConstructionFailed(format!(
                "depth size {}x{} is empty",
                depth_size.width, depth_size.height
            )));
        }
        if !(settings.view_frustum_min > 0.0
            && settings.view_frustum_min < settings.view_frustum_max)
        {
            return Err(EngineError::ConstructionFailed(format!(
                "invalid view frustum {} .. {}",
                settings.view_frustum_min, settings.view_frustum_max
            )));
        }

        info!(
            rgb = %rgb_size,
            depth = %depth_size,
            max_triangles = settings.max_triangles,
            "Depth grid engine constructed"
        );

        Ok(Self {
            settings,
            intrinsics: calibration.depth,
            disparity: calibration.disparity,
            depth_size,
            depth_meters: Vec::new(),
            pose: Pose::identity(),
            mesh: MeshBuffer::host(settings.max_triangles),
            frames: 0,
        })
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    fn unproject(&self, x: u32, y: u32, depth: f32) -> Vec3 {
        let k = &self.intrinsics;
        let camera = Vec3::new(
            (x as f32 - k.cx) * depth / k.fx,
            (y as f32 - k.cy) * depth / k.fy,
            depth,
        );
        self.pose.transform_point(camera)
    }

    fn triangulate(&self) -> Vec<Triangle> {
        let ImageSize { width, height } = self.depth_size;
        let at = |x: u32, y: u32| self.depth_meters[(y * width + x) as usize];
        let mut triangles = Vec::new();

        'rows: for y in 1..height {
            for x in 1..width {
                if triangles.len() >= self.settings.max_triangles {
                    break 'rows;
                }

                let d00 = at(x - 1, y - 1);
                let d10 = at(x, y - 1);
                let d01 = at(x - 1, y);
                let d11 = at(x, y);
                if d00 < 0.0 || d10 < 0.0 || d01 < 0.0 || d11 < 0.0 {
                    continue;
                }

                let max_diff = (d00 - d10)
                    .abs()
                    .max((d00 - d01).abs())
                    .max((d11 - d10).abs())
                    .max((d11 - d01).abs());
                if max_diff > DEPTH_DISCONTINUITY_THRESHOLD {
                    continue;
                }

                let p00 = self.unproject(x - 1, y - 1, d00);
                let p10 = self.unproject(x, y - 1, d10);
                let p01 = self.unproject(x - 1, y, d01);
                let p11 = self.unproject(x, y, d11);

                triangles.push(Triangle::new(p00, p01, p10));
                triangles.push(Triangle::new(p10, p01, p11));
            }
        }

        triangles
    }
}

impl ReconstructionEngine for DepthGridEngine {
    fn process_frame(
        &mut self,
        frame: &RgbdFrame,
        imu: Option<&ImuMeasurement>,
    ) -> EngineResult<()> {
        let actual = ImageSize::new(frame.depth.width(), frame.depth.height());
        if actual != self.depth_size {
            return Err(EngineError::Processing(format!(
                "depth frame is {}, engine expects {}",
                actual, self.depth_size
            )));
        }

        if let Some(imu) = imu {
            self.pose.rotation = imu.rotation;
        }

        let (near, far) = (
            self.settings.view_frustum_min,
            self.settings.view_frustum_max,
        );
        let fx = self.intrinsics.fx;
        let disparity = self.disparity;
        self.depth_meters = frame
            .depth
            .as_raw()
            .iter()
            .map(|&raw| match disparity.depth_meters(raw, fx) {
                Some(d) if (near..=far).contains(&d) => d,
                _ => -1.0,
            })
            .collect();

        self.frames += 1;
        Ok(())
    }

    fn set_tracked_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    fn mesh_scene(&mut self) -> EngineResult<()> {
        if self.depth_meters.is_empty() {
            debug!("No depth integrated yet, mesh stays empty");
            self.mesh.replace_host(Vec::new());
            return Ok(());
        }

        let triangles = self.triangulate();
        let count = triangles.len();
        let dropped = self.mesh.replace_host(triangles);
        if dropped > 0 {
            warn!(dropped, "Mesh exceeded triangle capacity");
        }
        debug!(triangles = count, "Scene meshed");
        Ok(())
    }

    fn mesh(&self) -> &MeshBuffer {
        &self.mesh
    }

    fn frames_processed(&self) -> u64 {
        self.frames
    }
}
