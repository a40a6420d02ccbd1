// SPDX-License-Identifier: GPL-3.0-only

//! Input source resolution
//!
//! Turns the command-line arguments into exactly one image source:
//!
//! 1. Color and depth masks given: read frames from disk (with an IMU
//!    stream when an IMU mask is given too). No probe is applied.
//! 2. Otherwise try each live-device candidate in order, keeping the first
//!    whose depth width is non-zero.
//! 3. Otherwise bridge frames and poses from the transport, even if no
//!    frame has arrived yet.
//!
//! Whatever is selected gets its calibration canonicalized.

use super::file_reader::{ImageFileReader, RawFileReader};
use super::imu::{ImuFileSource, ImuSource};
use super::pose::{NullPoseSource, PoseSource};
use super::structured_light::StructuredLightCandidate;
use super::topic_bridge::{BridgeTopics, TopicBridgePoseSource, TopicBridgeSource};
use super::uvc::UvcCandidate;
use super::vendor_depth::VendorDepthCandidate;
use super::{ImageSize, ImageSource, SourceDescriptor};
use crate::constants::raw_reader;
use crate::errors::SourceResult;
use crate::transport::Transport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A live device that may or may not be attached
pub trait SourceCandidate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Construct the source; a zero depth width means "not present"
    fn open(
        &self,
        calibration_path: &Path,
        device_hint: Option<&str>,
    ) -> SourceResult<Box<dyn ImageSource>>;
}

/// What the caller asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRequest {
    pub calibration: PathBuf,
    /// Color frame mask, or a device hint when no depth mask follows
    pub color_or_device: Option<String>,
    pub depth_mask: Option<String>,
    pub imu_mask: Option<String>,
}

impl SourceRequest {
    fn file_masks(&self) -> Option<(&str, &str)> {
        Some((self.color_or_device.as_deref()?, self.depth_mask.as_deref()?))
    }

    fn device_hint(&self) -> Option<&str> {
        match self.depth_mask {
            None => self.color_or_device.as_deref(),
            Some(_) => None,
        }
    }
}

pub struct ResolvedSources {
    pub image: Box<dyn ImageSource>,
    pub imu: Option<Box<dyn ImuSource>>,
    pub pose: Box<dyn PoseSource>,
}

impl ResolvedSources {
    pub fn descriptor(&self) -> &SourceDescriptor {
        self.image.descriptor()
    }
}

struct Bridge {
    transport: Arc<dyn Transport>,
    topics: BridgeTopics,
}

pub struct SourceResolver {
    candidates: Vec<Box<dyn SourceCandidate>>,
    bridge: Option<Bridge>,
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuredLightCandidate),
            Box::new(UvcCandidate),
            Box::new(VendorDepthCandidate),
        ])
    }
}

impl SourceResolver {
    /// Resolver with an explicit live-device list, tried in order
    pub fn new(candidates: Vec<Box<dyn SourceCandidate>>) -> Self {
        Self {
            candidates,
            bridge: None,
        }
    }

    /// Fall back to the transport when no local source is found
    pub fn with_bridge(mut self, transport: Arc<dyn Transport>, topics: BridgeTopics) -> Self {
        self.bridge = Some(Bridge { transport, topics });
        self
    }

    pub fn candidate_names(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|c| c.name()).collect()
    }

    /// Select a source; `None` when nothing could be opened
    pub fn resolve(&self, request: &SourceRequest) -> Option<ResolvedSources> {
        info!(calibration = %request.calibration.display(), "Using calibration file");

        let mut resolved = self
            .from_files(request)
            .or_else(|| self.from_candidates(request))
            .or_else(|| self.from_bridge(request))?;

        if resolved.image.calibration_mut().canonicalize() {
            info!("No disparity calibration, treating depth as millimeters");
        }
        info!(
            source = %resolved.descriptor(),
            rgb = %resolved.image.rgb_image_size(),
            depth = %resolved.image.depth_image_size(),
            pose = resolved.pose.name(),
            "Input source resolved"
        );
        Some(resolved)
    }

    fn from_files(&self, request: &SourceRequest) -> Option<ResolvedSources> {
        let (color, depth) = request.file_masks()?;
        info!(color, depth, "Using image files");

        let (image, imu): (Box<dyn ImageSource>, Option<Box<dyn ImuSource>>) =
            match request.imu_mask.as_deref() {
                None => (
                    Box::new(ImageFileReader::new(&request.calibration, color, depth)),
                    None,
                ),
                Some(imu_mask) => {
                    info!(imu = imu_mask, "Using IMU data");
                    (
                        Box::new(RawFileReader::new(
                            &request.calibration,
                            color,
                            depth,
                            imu_mask,
                            ImageSize::from(raw_reader::FRAME_SIZE),
                            raw_reader::DOWNSCALE,
                        )),
                        Some(Box::new(ImuFileSource::new(imu_mask))),
                    )
                }
            };

        Some(ResolvedSources {
            image,
            imu,
            pose: Box::new(NullPoseSource::new()),
        })
    }

    fn from_candidates(&self, request: &SourceRequest) -> Option<ResolvedSources> {
        let hint = request.device_hint();

        self.candidates.iter().find_map(|candidate| {
            info!(candidate = candidate.name(), hint = ?hint, "Trying live device");
            match candidate.open(&request.calibration, hint) {
                Ok(source) if source.depth_image_size().is_valid() => Some(ResolvedSources {
                    image: source,
                    imu: None,
                    pose: Box::new(NullPoseSource::new()),
                }),
                Ok(_) => {
                    info!(candidate = candidate.name(), "No device found");
                    None
                }
                Err(e) => {
                    info!(candidate = candidate.name(), error = %e, "Device unavailable");
                    None
                }
            }
        })
    }

    fn from_bridge(&self, request: &SourceRequest) -> Option<ResolvedSources> {
        let Some(bridge) = &self.bridge else {
            warn!("No local source and no transport to bridge from");
            return None;
        };
        info!("Checking for frames published on the transport");

        let pose = match TopicBridgePoseSource::subscribe(bridge.transport.as_ref(), &bridge.topics)
        {
            Ok(pose) => pose,
            Err(e) => {
                error!(error = %e, "Could not subscribe to transforms");
                return None;
            }
        };
        let image = match TopicBridgeSource::subscribe(
            bridge.transport.as_ref(),
            &bridge.topics,
            &request.calibration,
        ) {
            Ok(image) => image,
            Err(e) => {
                error!(error = %e, "Could not subscribe to image topics");
                return None;
            }
        };

        if !image.depth_image_size().is_valid() {
            warn!("No depth frames received yet, keeping the bridge anyway");
        }

        Some(ResolvedSources {
            image: Box::new(image),
            imu: None,
            pose: Box::new(pose),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_argument_is_device_hint() {
        let request = SourceRequest {
            calibration: PathBuf::from("calib.txt"),
            color_or_device: Some("/dev/video2".to_string()),
            ..Default::default()
        };
        assert_eq!(request.device_hint(), Some("/dev/video2"));
        assert!(request.file_masks().is_none());
    }

    #[test]
    fn test_two_arguments_are_masks() {
        let request = SourceRequest {
            calibration: PathBuf::from("calib.txt"),
            color_or_device: Some("%04i.ppm".to_string()),
            depth_mask: Some("%04i.pgm".to_string()),
            imu_mask: None,
        };
        assert_eq!(request.device_hint(), None);
        assert_eq!(request.file_masks(), Some(("%04i.ppm", "%04i.pgm")));
    }

    #[test]
    fn test_default_candidate_order() {
        assert_eq!(
            SourceResolver::default().candidate_names(),
            vec!["structured-light", "generic-uvc", "vendor-depth"]
        );
    }
}
