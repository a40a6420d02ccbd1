// SPDX-License-Identifier: GPL-3.0-only

//! Frames and poses received over the transport
//!
//! Color, depth and transform messages arrive on delivery threads. Images
//! land in latest-value slots that the run loop drains; transforms for the
//! camera frame are forwarded to the bound engine, or latched until an
//! engine is bound.

use super::pose::PoseSource;
use super::{
    DepthImage, FrameStatus, ImageSize, ImageSource, LatestSlot, RgbdFrame, SourceCore,
    SourceDescriptor,
};
use crate::calibration::CalibrationProfile;
use crate::config::NodeConfig;
use crate::engine::{Pose, SharedEngine, lock_engine};
use crate::errors::{SourceResult, TransportResult};
use crate::transport::{Message, Subscription, Transport};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Topic names and queue depth for the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTopics {
    pub rgb: String,
    pub depth: String,
    pub pose: String,
    pub queue_depth: usize,
    /// Child frame whose transforms drive the camera pose
    pub camera_frame_id: String,
}

impl BridgeTopics {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            rgb: config.rgb_image_topic.clone(),
            depth: config.depth_image_topic.clone(),
            pose: config.pose_topic.clone(),
            queue_depth: config.subscriber_queue_depth,
            camera_frame_id: config.camera_frame_id.clone(),
        }
    }
}

#[derive(Default)]
struct ReceivedSizes {
    rgb: ImageSize,
    depth: ImageSize,
}

pub struct TopicBridgeSource {
    core: SourceCore,
    rgb_slot: LatestSlot<RgbImage>,
    depth_slot: LatestSlot<DepthImage>,
    sizes: Arc<Mutex<ReceivedSizes>>,
    sequence: u64,
    _subscriptions: Vec<Subscription>,
}

impl TopicBridgeSource {
    /// Subscribe to the color and depth topics
    pub fn subscribe(
        transport: &dyn Transport,
        topics: &BridgeTopics,
        calibration_path: &Path,
    ) -> TransportResult<Self> {
        let rgb_slot = LatestSlot::new();
        let depth_slot = LatestSlot::new();
        let sizes = Arc::new(Mutex::new(ReceivedSizes::default()));

        let rgb_sub = {
            let slot = rgb_slot.clone();
            let sizes = Arc::clone(&sizes);
            transport.subscribe(
                &topics.rgb,
                topics.queue_depth,
                Box::new(move |message| {
                    let Message::Image(image) = message else {
                        debug!("Ignoring non-image message on color topic");
                        return;
                    };
                    match image.to_rgb() {
                        Ok(rgb) => {
                            sizes.lock().unwrap_or_else(PoisonError::into_inner).rgb =
                                ImageSize::new(rgb.width(), rgb.height());
                            slot.put(rgb);
                        }
                        Err(e) => warn!(error = %e, "Dropping color image"),
                    }
                }),
            )?
        };

        let depth_sub = {
            let slot = depth_slot.clone();
            let sizes = Arc::clone(&sizes);
            transport.subscribe(
                &topics.depth,
                topics.queue_depth,
                Box::new(move |message| {
                    let Message::Image(image) = message else {
                        debug!("Ignoring non-image message on depth topic");
                        return;
                    };
                    match image.to_depth() {
                        Ok(depth) => {
                            sizes.lock().unwrap_or_else(PoisonError::into_inner).depth =
                                ImageSize::new(depth.width(), depth.height());
                            slot.put(depth);
                        }
                        Err(e) => warn!(error = %e, "Dropping depth image"),
                    }
                }),
            )?
        };

        info!(rgb = %topics.rgb, depth = %topics.depth, "Subscribed to image topics");

        let descriptor = SourceDescriptor::TopicBridge {
            calibration: PathBuf::from(calibration_path),
            rgb_topic: topics.rgb.clone(),
            depth_topic: topics.depth.clone(),
            pose_topic: topics.pose.clone(),
        };
        Ok(Self {
            core: SourceCore::new(
                descriptor,
                CalibrationProfile::load_or_default(calibration_path),
            ),
            rgb_slot,
            depth_slot,
            sizes,
            sequence: 0,
            _subscriptions: vec![rgb_sub, depth_sub],
        })
    }

    fn sizes(&self) -> std::sync::MutexGuard<'_, ReceivedSizes> {
        self.sizes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ImageSource for TopicBridgeSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    /// Size of the last color image received; zero until one arrives
    fn rgb_image_size(&self) -> ImageSize {
        self.sizes().rgb
    }

    /// Size of the last depth image received; zero until one arrives
    fn depth_image_size(&self) -> ImageSize {
        self.sizes().depth
    }

    fn next_frame(&mut self) -> SourceResult<FrameStatus> {
        let Some(rgb) = self.rgb_slot.peek() else {
            return Ok(FrameStatus::Pending);
        };
        let Some(depth) = self.depth_slot.take() else {
            return Ok(FrameStatus::Pending);
        };
        self.sequence += 1;
        Ok(FrameStatus::Frame(RgbdFrame {
            rgb,
            depth,
            sequence: self.sequence,
        }))
    }
}

#[derive(Default)]
struct PoseState {
    engine: Option<SharedEngine>,
    latched: Option<Pose>,
    applied: u64,
}

impl PoseState {
    fn apply(&mut self, pose: Pose) {
        match &self.engine {
            Some(engine) => {
                lock_engine(engine).set_tracked_pose(pose);
                self.applied += 1;
            }
            None => self.latched = Some(pose),
        }
    }
}

/// Camera poses from a transform stream
pub struct TopicBridgePoseSource {
    state: Arc<Mutex<PoseState>>,
    _subscription: Subscription,
}

impl TopicBridgePoseSource {
    pub fn subscribe(transport: &dyn Transport, topics: &BridgeTopics) -> TransportResult<Self> {
        let state = Arc::new(Mutex::new(PoseState::default()));
        let callback_state = Arc::clone(&state);
        let camera_frame_id = topics.camera_frame_id.clone();

        let subscription = transport.subscribe(
            &topics.pose,
            topics.queue_depth,
            Box::new(move |message| {
                let Message::Transform(tf) = message else {
                    return;
                };
                let mut state = callback_state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                for transform in tf
                    .transforms
                    .iter()
                    .filter(|t| t.child_frame_id == camera_frame_id)
                {
                    state.apply(transform.to_pose());
                }
            }),
        )?;

        info!(topic = %topics.pose, frame = %topics.camera_frame_id, "Subscribed to transforms");
        Ok(Self {
            state,
            _subscription: subscription,
        })
    }

    /// Poses delivered to the engine so far
    pub fn applied_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .applied
    }

    /// Latest pose received before an engine was bound
    pub fn latched_pose(&self) -> Option<Pose> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latched
    }
}

impl PoseSource for TopicBridgePoseSource {
    fn name(&self) -> &'static str {
        "topic-bridge"
    }

    fn bind_engine(&mut self, engine: SharedEngine) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.engine = Some(engine);
        if let Some(pose) = state.latched.take() {
            debug!("Applying pose latched before engine bind");
            state.apply(pose);
        }
    }
}
