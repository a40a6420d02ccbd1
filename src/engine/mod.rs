// SPDX-License-Identifier: GPL-3.0-only

//! Reconstruction engine contract
//!
//! The node never looks inside the engine. It constructs one through an
//! [`EngineFactory`], feeds it frames and tracked poses, asks it to mesh
//! the scene and reads back the [`MeshBuffer`].

pub mod depth_grid;

pub use depth_grid::{DepthGridEngine, DepthGridFactory};

use crate::backends::source::{ImageSize, ImuMeasurement, RgbdFrame};
use crate::calibration::CalibrationProfile;
use crate::errors::EngineResult;
use crate::pipelines::mesh::{MeshBuffer, Vec3};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Volume and capacity settings handed to the engine at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Near plane (meters)
    pub view_frustum_min: f32,
    /// Far plane (meters)
    pub view_frustum_max: f32,
    /// Triangle capacity of the mesh buffer
    pub max_triangles: usize,
}

/// Camera-to-world rigid transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rotation: [[f32; 3]; 3],
    pub translation: [f32; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub const fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Build from a translation and a unit quaternion `[x, y, z, w]`
    pub fn from_quaternion(translation: [f32; 3], q: [f32; 4]) -> Self {
        let norm = q.iter().map(|c| c * c).sum::<f32>().sqrt();
        let [x, y, z, w] = if norm > f32::EPSILON {
            q.map(|c| c / norm)
        } else {
            [0.0, 0.0, 0.0, 1.0]
        };
        Self {
            rotation: [
                [
                    1.0 - 2.0 * (y * y + z * z),
                    2.0 * (x * y - z * w),
                    2.0 * (x * z + y * w),
                ],
                [
                    2.0 * (x * y + z * w),
                    1.0 - 2.0 * (x * x + z * z),
                    2.0 * (y * z - x * w),
                ],
                [
                    2.0 * (x * z - y * w),
                    2.0 * (y * z + x * w),
                    1.0 - 2.0 * (x * x + y * y),
                ],
            ],
            translation,
        }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let r = &self.rotation;
        let t = &self.translation;
        Vec3::new(
            r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + t[0],
            r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + t[1],
            r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + t[2],
        )
    }
}

/// Dense reconstruction engine as seen by the node
pub trait ReconstructionEngine: Send {
    /// Integrate one frame
    fn process_frame(&mut self, frame: &RgbdFrame, imu: Option<&ImuMeasurement>)
    -> EngineResult<()>;

    /// Override the tracker with an externally supplied pose
    fn set_tracked_pose(&mut self, pose: Pose);

    /// Run the meshing step, refreshing [`ReconstructionEngine::mesh`]
    fn mesh_scene(&mut self) -> EngineResult<()>;

    /// Mesh produced by the last meshing step
    fn mesh(&self) -> &MeshBuffer;

    fn frames_processed(&self) -> u64;
}

/// Builds an engine for a resolved source
pub trait EngineFactory: Send + Sync {
    fn construct(
        &self,
        settings: &EngineSettings,
        calibration: &CalibrationProfile,
        rgb_size: ImageSize,
        depth_size: ImageSize,
    ) -> EngineResult<Box<dyn ReconstructionEngine>>;
}

/// Engine shared between the run loop, pose deliveries and publish requests
pub type SharedEngine = Arc<Mutex<Box<dyn ReconstructionEngine>>>;

pub fn share(engine: Box<dyn ReconstructionEngine>) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

/// Lock the engine, recovering the guard if a previous holder panicked
pub fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, Box<dyn ReconstructionEngine>> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}
