// SPDX-License-Identifier: GPL-3.0-only

//! Generic UVC depth cameras
//!
//! Depth cameras driven by `uvcvideo` expose a 16-bit depth node (`Z16 `
//! or `Y16 `) and usually a color node on the same USB device. Both are
//! streamed on their own capture threads.

use super::frame_loop::CaptureLoopController;
use super::resolver::SourceCandidate;
use super::v4l2_utils::{
    self, DeviceMatch, color_to_rgb, depth_from_le16, find_capture_node, find_sibling_node,
};
use super::{
    DepthImage, FrameStatus, ImageSize, ImageSource, LatestSlot, RgbdFrame, SourceCore,
    SourceDescriptor, depth_to_rgb,
};
use crate::calibration::CalibrationProfile;
use crate::constants::devices::{UVC_DEPTH_FOURCCS, UVC_DRIVERS};
use crate::errors::{SourceError, SourceResult};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Color formats accepted from the sibling node, in order of preference
const COLOR_FOURCCS: &[&[u8; 4]] = &[b"RGB3", b"YUYV", b"MJPG"];

#[derive(Debug, Clone, Copy, Default)]
pub struct UvcCandidate;

impl SourceCandidate for UvcCandidate {
    fn name(&self) -> &'static str {
        "generic-uvc"
    }

    fn open(
        &self,
        calibration_path: &Path,
        device_hint: Option<&str>,
    ) -> SourceResult<Box<dyn ImageSource>> {
        let depth_node = find_capture_node(UVC_DRIVERS, UVC_DEPTH_FOURCCS, device_hint)
            .ok_or_else(|| {
                SourceError::DeviceUnavailable("no UVC node with a 16-bit depth format".into())
            })?;
        let color_node = find_sibling_node(&depth_node, COLOR_FOURCCS);

        let descriptor = SourceDescriptor::GenericUvc {
            calibration: PathBuf::from(calibration_path),
            device_hint: device_hint.map(str::to_string),
        };
        let calibration = CalibrationProfile::load_or_default(calibration_path);
        Ok(Box::new(UvcSource::start(
            descriptor,
            calibration,
            depth_node,
            color_node,
        )?))
    }
}

pub struct UvcSource {
    core: SourceCore,
    depth_size: ImageSize,
    rgb_size: ImageSize,
    depth_slot: LatestSlot<DepthImage>,
    color_slot: Option<LatestSlot<RgbImage>>,
    depth_loop: CaptureLoopController,
    _color_loop: Option<CaptureLoopController>,
    sequence: u64,
}

impl UvcSource {
    fn start(
        descriptor: SourceDescriptor,
        calibration: CalibrationProfile,
        depth_node: DeviceMatch,
        color_node: Option<DeviceMatch>,
    ) -> SourceResult<Self> {
        info!(
            depth = %depth_node.path.display(),
            card = %depth_node.card,
            size = %depth_node.size,
            color = ?color_node.as_ref().map(|n| n.path.display().to_string()),
            "Opening UVC depth camera"
        );

        let depth_size = depth_node.size;
        let depth_slot = LatestSlot::new();
        let depth_loop = v4l2_utils::spawn_capture(
            "uvc-depth",
            &depth_node,
            depth_slot.clone(),
            move |buf| depth_from_le16(buf, depth_size),
        )
        .map_err(SourceError::DeviceUnavailable)?;

        let mut rgb_size = depth_size;
        let mut color_slot = None;
        let mut color_loop = None;
        if let Some(node) = color_node {
            let slot = LatestSlot::new();
            let (fourcc, size) = (node.fourcc, node.size);
            match v4l2_utils::spawn_capture("uvc-color", &node, slot.clone(), move |buf| {
                color_to_rgb(buf, &fourcc, size)
            }) {
                Ok(controller) => {
                    rgb_size = size;
                    color_slot = Some(slot);
                    color_loop = Some(controller);
                }
                Err(e) => warn!(error = %e, "Color node unusable, using depth preview"),
            }
        }

        Ok(Self {
            core: SourceCore::new(descriptor, calibration),
            depth_size,
            rgb_size,
            depth_slot,
            color_slot,
            depth_loop,
            _color_loop: color_loop,
            sequence: 0,
        })
    }
}

impl ImageSource for UvcSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    fn rgb_image_size(&self) -> ImageSize {
        self.rgb_size
    }

    fn depth_image_size(&self) -> ImageSize {
        self.depth_size
    }

    fn next_frame(&mut self) -> SourceResult<FrameStatus> {
        let Some(depth) = self.depth_slot.take() else {
            if self.depth_loop.is_running() {
                return Ok(FrameStatus::Pending);
            }
            return Ok(FrameStatus::Exhausted);
        };

        let rgb = match &self.color_slot {
            Some(slot) => match slot.peek() {
                Some(rgb) => rgb,
                None => return Ok(FrameStatus::Pending),
            },
            None => depth_to_rgb(&depth),
        };

        self.sequence += 1;
        Ok(FrameStatus::Frame(RgbdFrame {
            rgb,
            depth,
            sequence: self.sequence,
        }))
    }
}
