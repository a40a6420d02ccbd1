// SPDX-License-Identifier: GPL-3.0-only

//! One reconstruction run
//!
//! A session owns the resolved sources for as long as the run loop is
//! active. The loop runs on the caller's thread and checks the exit flag
//! once per iteration, so a stop request is observed after the frame in
//! flight has been integrated.

use crate::backends::source::{
    ImageSource, ImuSource, PoseSource, ResolvedSources, SourceDescriptor, StepOutcome,
};
use crate::constants::timing::{FRAME_LOG_INTERVAL, IDLE_POLL_INTERVAL};
use crate::engine::SharedEngine;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopRequested,
    SourceExhausted,
}

/// What a finished run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_processed: u64,
    /// Iterations where the source had nothing new
    pub idle_polls: u64,
    /// Frames that failed to read or integrate
    pub errors: u64,
    pub exit_reason: ExitReason,
}

/// Cloneable stop signal for a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    exit: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the loop to exit; returns immediately
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }
}

pub struct RunSession {
    id: Uuid,
    image: Box<dyn ImageSource>,
    imu: Option<Box<dyn ImuSource>>,
    pose: Box<dyn PoseSource>,
    exit: Arc<AtomicBool>,
}

impl RunSession {
    pub fn new(sources: ResolvedSources) -> Self {
        let ResolvedSources { image, imu, pose } = sources;
        Self {
            id: Uuid::new_v4(),
            image,
            imu,
            pose,
            exit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            exit: Arc::clone(&self.exit),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        self.image.descriptor()
    }

    pub fn image_source(&self) -> &dyn ImageSource {
        self.image.as_ref()
    }

    /// Hand the engine to the image and pose sources
    pub fn bind_engine(&mut self, engine: &SharedEngine) {
        self.image.bind_engine(Arc::clone(engine));
        self.pose.bind_engine(Arc::clone(engine));
        debug!(session = %self.id, pose = self.pose.name(), "Engine bound to sources");
    }

    /// Process frames until the source runs dry or an exit is requested
    pub fn run(&mut self) -> RunSummary {
        info!(session = %self.id, source = %self.descriptor(), "Run loop started");

        let mut frames_processed = 0u64;
        let mut idle_polls = 0u64;
        let mut errors = 0u64;

        let exit_reason = loop {
            if self.exit.load(Ordering::SeqCst) {
                break ExitReason::StopRequested;
            }

            let imu = self.imu.as_deref_mut().map(|imu| imu as &mut dyn ImuSource);
            match self.image.step(imu) {
                Ok(StepOutcome::Processed) => {
                    frames_processed += 1;
                    if frames_processed % FRAME_LOG_INTERVAL == 0 {
                        debug!(session = %self.id, frames_processed, "Integrating frames");
                    }
                }
                Ok(StepOutcome::Pending) => {
                    idle_polls += 1;
                    std::thread::sleep(IDLE_POLL_INTERVAL);
                }
                Ok(StepOutcome::Exhausted) => break ExitReason::SourceExhausted,
                Err(e) => {
                    errors += 1;
                    if errors == 1 || errors % FRAME_LOG_INTERVAL == 0 {
                        warn!(session = %self.id, errors, error = %e, "Frame skipped");
                    }
                }
            }
        };

        let summary = RunSummary {
            frames_processed,
            idle_polls,
            errors,
            exit_reason,
        };
        info!(
            session = %self.id,
            frames_processed,
            idle_polls,
            errors,
            exit_reason = ?exit_reason,
            "Run loop finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::source::{
        DepthImage, FrameStatus, ImageSize, ImuMeasurement, NullPoseSource, RgbdFrame, SourceCore,
    };
    use crate::calibration::CalibrationProfile;
    use crate::engine::{Pose, ReconstructionEngine, lock_engine, share};
    use crate::errors::{EngineResult, SourceError, SourceResult};
    use crate::pipelines::mesh::MeshBuffer;
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    struct ScriptedSource {
        core: SourceCore,
        script: VecDeque<SourceResult<FrameStatus>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<SourceResult<FrameStatus>>) -> Self {
            Self {
                core: SourceCore::new(
                    SourceDescriptor::FilePair {
                        calibration: PathBuf::new(),
                        color_mask: String::new(),
                        depth_mask: String::new(),
                    },
                    CalibrationProfile::default(),
                ),
                script: script.into(),
            }
        }
    }

    impl ImageSource for ScriptedSource {
        fn core(&self) -> &SourceCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut SourceCore {
            &mut self.core
        }
        fn rgb_image_size(&self) -> ImageSize {
            ImageSize::new(1, 1)
        }
        fn depth_image_size(&self) -> ImageSize {
            ImageSize::new(1, 1)
        }
        fn next_frame(&mut self) -> SourceResult<FrameStatus> {
            self.script.pop_front().unwrap_or(Ok(FrameStatus::Exhausted))
        }
    }

    struct CountingEngine {
        mesh: MeshBuffer,
        frames: u64,
    }

    impl ReconstructionEngine for CountingEngine {
        fn process_frame(&mut self, _: &RgbdFrame, _: Option<&ImuMeasurement>) -> EngineResult<()> {
            self.frames += 1;
            Ok(())
        }
        fn set_tracked_pose(&mut self, _: Pose) {}
        fn mesh_scene(&mut self) -> EngineResult<()> {
            Ok(())
        }
        fn mesh(&self) -> &MeshBuffer {
            &self.mesh
        }
        fn frames_processed(&self) -> u64 {
            self.frames
        }
    }

    fn frame() -> SourceResult<FrameStatus> {
        frame_at(0)
    }

    fn frame_at(sequence: u64) -> SourceResult<FrameStatus> {
        Ok(FrameStatus::Frame(RgbdFrame {
            rgb: RgbImage::new(1, 1),
            depth: DepthImage::new(1, 1),
            sequence,
        }))
    }

    /// Reading whose first rotation entry is the frame number it belongs to
    struct TaggedImu;

    impl ImuSource for TaggedImu {
        fn measurement_for(&mut self, sequence: u64) -> SourceResult<Option<ImuMeasurement>> {
            let mut rotation = [[0.0; 3]; 3];
            rotation[0][0] = sequence as f32;
            Ok(Some(ImuMeasurement { rotation }))
        }
    }

    /// Records `(frame sequence, IMU tag)` for every integrated frame
    struct PairingEngine {
        mesh: MeshBuffer,
        pairs: Arc<std::sync::Mutex<Vec<(u64, f32)>>>,
    }

    impl ReconstructionEngine for PairingEngine {
        fn process_frame(
            &mut self,
            frame: &RgbdFrame,
            imu: Option<&ImuMeasurement>,
        ) -> EngineResult<()> {
            let tag = imu.map_or(-1.0, |m| m.rotation[0][0]);
            self.pairs.lock().unwrap().push((frame.sequence, tag));
            Ok(())
        }
        fn set_tracked_pose(&mut self, _: Pose) {}
        fn mesh_scene(&mut self) -> EngineResult<()> {
            Ok(())
        }
        fn mesh(&self) -> &MeshBuffer {
            &self.mesh
        }
        fn frames_processed(&self) -> u64 {
            self.pairs.lock().unwrap().len() as u64
        }
    }

    fn session(script: Vec<SourceResult<FrameStatus>>) -> (RunSession, SharedEngine) {
        let mut session = RunSession::new(ResolvedSources {
            image: Box::new(ScriptedSource::new(script)),
            imu: None,
            pose: Box::new(NullPoseSource::new()),
        });
        let engine = share(Box::new(CountingEngine {
            mesh: MeshBuffer::host(4),
            frames: 0,
        }));
        session.bind_engine(&engine);
        (session, engine)
    }

    #[test]
    fn test_runs_until_exhausted() {
        let (mut session, engine) = session(vec![
            frame(),
            Ok(FrameStatus::Pending),
            Err(SourceError::FrameRead("bad".into())),
            frame(),
        ]);
        let summary = session.run();

        assert_eq!(summary.exit_reason, ExitReason::SourceExhausted);
        assert_eq!(summary.frames_processed, 2);
        assert_eq!(summary.idle_polls, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(lock_engine(&engine).frames_processed(), 2);
    }

    #[test]
    fn test_imu_stays_paired_after_frame_error() {
        let mut session = RunSession::new(ResolvedSources {
            image: Box::new(ScriptedSource::new(vec![
                frame_at(0),
                Err(SourceError::FrameRead("frame 1 unreadable".into())),
                frame_at(2),
                frame_at(3),
            ])),
            imu: Some(Box::new(TaggedImu)),
            pose: Box::new(NullPoseSource::new()),
        });
        let pairs = Arc::new(std::sync::Mutex::new(Vec::new()));
        let engine = share(Box::new(PairingEngine {
            mesh: MeshBuffer::host(4),
            pairs: Arc::clone(&pairs),
        }));
        session.bind_engine(&engine);

        let summary = session.run();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.frames_processed, 3);

        let pairs = pairs.lock().unwrap().clone();
        assert_eq!(pairs, vec![(0, 0.0), (2, 2.0), (3, 3.0)]);
    }

    #[test]
    fn test_exit_requested_before_run() {
        let (mut session, _engine) = session(vec![frame(), frame()]);
        session.handle().request_exit();
        let summary = session.run();

        assert_eq!(summary.exit_reason, ExitReason::StopRequested);
        assert_eq!(summary.frames_processed, 0);
    }

    #[test]
    fn test_handle_shares_session_id() {
        let (session, _engine) = session(Vec::new());
        assert_eq!(session.handle().id(), session.id());
        assert!(!session.handle().exit_requested());
    }
}
