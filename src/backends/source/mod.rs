// SPDX-License-Identifier: GPL-3.0-only

//! RGB-D input sources
//!
//! Every source owns its calibration and reports the color and depth frame
//! sizes it produces. A depth width of zero marks a source that found no
//! device. Once a reconstruction engine exists it is bound into the source,
//! and [`ImageSource::step`] pushes the next frame straight into it.
//!
//! # Sources
//!
//! - [`file_reader`]: numbered image pairs on disk, optionally with IMU data
//! - [`structured_light`]: native USB structured-light sensor (freedepth)
//! - [`uvc`]: generic UVC depth camera over V4L2
//! - [`vendor_depth`]: kernel-driver depth sensor over V4L2 (Y10B)
//! - [`topic_bridge`]: frames and poses received over a [`crate::transport::Transport`]

pub mod file_reader;
pub mod frame_loop;
pub mod imu;
pub mod pose;
pub mod resolver;
pub mod structured_light;
pub mod topic_bridge;
pub mod uvc;
pub mod v4l2_utils;
pub mod vendor_depth;

pub use file_reader::{ImageFileReader, RawFileReader};
pub use imu::{ImuFileSource, ImuMeasurement, ImuSource};
pub use pose::{NullPoseSource, PoseSource};
pub use resolver::{ResolvedSources, SourceCandidate, SourceRequest, SourceResolver};
pub use topic_bridge::{BridgeTopics, TopicBridgePoseSource, TopicBridgeSource};

use crate::calibration::CalibrationProfile;
use crate::engine::{SharedEngine, lock_engine};
use crate::errors::{NodeError, NodeResult, SourceResult};
use image::{ImageBuffer, Luma, RgbImage};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// 16-bit single-channel depth image (raw sensor units)
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A source is usable only if it reports a non-zero width
    pub fn is_valid(&self) -> bool {
        self.width != 0
    }
}

impl From<(u32, u32)> for ImageSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One color + depth pair
#[derive(Debug, Clone)]
pub struct RgbdFrame {
    pub rgb: RgbImage,
    pub depth: DepthImage,
    pub sequence: u64,
}

#[derive(Debug)]
pub enum FrameStatus {
    Frame(RgbdFrame),
    /// Nothing new yet; poll again
    Pending,
    /// The source will never produce another frame
    Exhausted,
}

/// Result of one [`ImageSource::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Processed,
    Pending,
    Exhausted,
}

/// Which kind of source was selected, with its construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    FilePair {
        calibration: PathBuf,
        color_mask: String,
        depth_mask: String,
    },
    FilePairWithImu {
        calibration: PathBuf,
        color_mask: String,
        depth_mask: String,
        imu_mask: String,
    },
    StructuredLight {
        calibration: PathBuf,
        device_hint: Option<String>,
    },
    GenericUvc {
        calibration: PathBuf,
        device_hint: Option<String>,
    },
    VendorDepth {
        calibration: PathBuf,
        device_hint: Option<String>,
    },
    TopicBridge {
        calibration: PathBuf,
        rgb_topic: String,
        depth_topic: String,
        pose_topic: String,
    },
}

impl SourceDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FilePair { .. } => "file-pair",
            Self::FilePairWithImu { .. } => "file-pair-imu",
            Self::StructuredLight { .. } => "structured-light",
            Self::GenericUvc { .. } => "generic-uvc",
            Self::VendorDepth { .. } => "vendor-depth",
            Self::TopicBridge { .. } => "topic-bridge",
        }
    }

    pub fn is_live_device(&self) -> bool {
        matches!(
            self,
            Self::StructuredLight { .. } | Self::GenericUvc { .. } | Self::VendorDepth { .. }
        )
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// State shared by every source implementation
pub struct SourceCore {
    descriptor: SourceDescriptor,
    calibration: CalibrationProfile,
    engine: Option<SharedEngine>,
}

impl SourceCore {
    pub fn new(descriptor: SourceDescriptor, calibration: CalibrationProfile) -> Self {
        Self {
            descriptor,
            calibration,
            engine: None,
        }
    }
}

pub trait ImageSource: Send {
    fn core(&self) -> &SourceCore;
    fn core_mut(&mut self) -> &mut SourceCore;

    fn rgb_image_size(&self) -> ImageSize;
    fn depth_image_size(&self) -> ImageSize;

    /// Fetch the next frame without blocking on the device
    fn next_frame(&mut self) -> SourceResult<FrameStatus>;

    fn descriptor(&self) -> &SourceDescriptor {
        &self.core().descriptor
    }

    fn calibration(&self) -> &CalibrationProfile {
        &self.core().calibration
    }

    fn calibration_mut(&mut self) -> &mut CalibrationProfile {
        &mut self.core_mut().calibration
    }

    fn bind_engine(&mut self, engine: SharedEngine) {
        self.core_mut().engine = Some(engine);
    }

    fn bound_engine(&self) -> Option<&SharedEngine> {
        self.core().engine.as_ref()
    }

    /// Feed the next frame (and IMU reading, if any) to the bound engine
    fn step(&mut self, imu: Option<&mut dyn ImuSource>) -> NodeResult<StepOutcome> {
        let engine = self
            .bound_engine()
            .cloned()
            .ok_or(NodeError::NoActiveReconstruction)?;

        let frame = match self.next_frame()? {
            FrameStatus::Frame(frame) => frame,
            FrameStatus::Pending => return Ok(StepOutcome::Pending),
            FrameStatus::Exhausted => return Ok(StepOutcome::Exhausted),
        };

        let measurement = match imu {
            Some(imu) => imu.measurement_for(frame.sequence)?,
            None => None,
        };

        lock_engine(&engine).process_frame(&frame, measurement.as_ref())?;
        Ok(StepOutcome::Processed)
    }
}

/// Single-value mailbox between a producer thread and the run loop
#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any unread one
    pub fn put(&self, value: T) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Copy of the current value, leaving it in place
    pub fn peek(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Placeholder for a candidate whose backend is not compiled in
pub struct UnavailableSource {
    core: SourceCore,
}

impl UnavailableSource {
    pub fn new(descriptor: SourceDescriptor, calibration: CalibrationProfile) -> Self {
        Self {
            core: SourceCore::new(descriptor, calibration),
        }
    }
}

impl ImageSource for UnavailableSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    fn rgb_image_size(&self) -> ImageSize {
        ImageSize::default()
    }

    fn depth_image_size(&self) -> ImageSize {
        ImageSize::default()
    }

    fn next_frame(&mut self) -> SourceResult<FrameStatus> {
        Ok(FrameStatus::Exhausted)
    }
}

/// Grayscale preview of a depth image, used where a device has no color stream
pub fn depth_to_rgb(depth: &DepthImage) -> RgbImage {
    let max = depth.as_raw().iter().copied().max().unwrap_or(0).max(1) as u32;
    RgbImage::from_fn(depth.width(), depth.height(), |x, y| {
        let v = (depth.get_pixel(x, y).0[0] as u32 * 255 / max) as u8;
        image::Rgb([v, v, v])
    })
}
