// SPDX-License-Identifier: GPL-3.0-only

//! Depth sensors served by vendor kernel drivers
//!
//! The `gspca_kinect` family exposes depth as Y10B (10-bit packed) on a
//! V4L2 node. Color and depth share the node, so frames carry a grayscale
//! rendering of the depth in place of color.

use super::frame_loop::CaptureLoopController;
use super::resolver::SourceCandidate;
use super::v4l2_utils::{self, find_capture_node, unpack_y10b};
use super::{
    DepthImage, FrameStatus, ImageSize, ImageSource, LatestSlot, RgbdFrame, SourceCore,
    SourceDescriptor, depth_to_rgb,
};
use crate::calibration::CalibrationProfile;
use crate::constants::devices::{VENDOR_DEPTH_DRIVERS, VENDOR_DEPTH_FOURCC};
use crate::errors::{SourceError, SourceResult};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct VendorDepthCandidate;

impl SourceCandidate for VendorDepthCandidate {
    fn name(&self) -> &'static str {
        "vendor-depth"
    }

    fn open(
        &self,
        calibration_path: &Path,
        device_hint: Option<&str>,
    ) -> SourceResult<Box<dyn ImageSource>> {
        let node = find_capture_node(VENDOR_DEPTH_DRIVERS, &[VENDOR_DEPTH_FOURCC], device_hint)
            .ok_or_else(|| {
                SourceError::DeviceUnavailable("no kernel depth driver exposing Y10B".into())
            })?;

        info!(
            path = %node.path.display(),
            driver = %node.driver,
            size = %node.size,
            "Opening vendor depth sensor"
        );

        let size = node.size;
        let slot = LatestSlot::new();
        let capture = v4l2_utils::spawn_capture("vendor-depth", &node, slot.clone(), move |buf| {
            unpack_y10b(buf, size)
        })
        .map_err(SourceError::DeviceUnavailable)?;

        let descriptor = SourceDescriptor::VendorDepth {
            calibration: PathBuf::from(calibration_path),
            device_hint: device_hint.map(str::to_string),
        };
        Ok(Box::new(VendorDepthSource {
            core: SourceCore::new(
                descriptor,
                CalibrationProfile::load_or_default(calibration_path),
            ),
            size,
            slot,
            capture,
            sequence: 0,
        }))
    }
}

pub struct VendorDepthSource {
    core: SourceCore,
    size: ImageSize,
    slot: LatestSlot<DepthImage>,
    capture: CaptureLoopController,
    sequence: u64,
}

impl ImageSource for VendorDepthSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    fn rgb_image_size(&self) -> ImageSize {
        self.size
    }

    fn depth_image_size(&self) -> ImageSize {
        self.size
    }

    fn next_frame(&mut self) -> SourceResult<FrameStatus> {
        match self.slot.take() {
            Some(depth) => {
                self.sequence += 1;
                Ok(FrameStatus::Frame(RgbdFrame {
                    rgb: depth_to_rgb(&depth),
                    depth,
                    sequence: self.sequence,
                }))
            }
            None if self.capture.is_running() => Ok(FrameStatus::Pending),
            None => Ok(FrameStatus::Exhausted),
        }
    }
}
