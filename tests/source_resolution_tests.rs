// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for input source resolution

use fusion_node::backends::source::{
    BridgeTopics, FrameStatus, ImageSize, ImageSource, SourceCandidate, SourceCore,
    SourceDescriptor, SourceRequest, SourceResolver,
};
use fusion_node::calibration::{CalibrationProfile, DisparityCalib, DisparityKind};
use fusion_node::config::NodeConfig;
use fusion_node::errors::{SourceError, SourceResult};
use fusion_node::transport::LocalBus;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type ProbeLog = Arc<Mutex<Vec<&'static str>>>;

struct FakeSource {
    core: SourceCore,
    depth: ImageSize,
}

impl ImageSource for FakeSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    fn rgb_image_size(&self) -> ImageSize {
        self.depth
    }

    fn depth_image_size(&self) -> ImageSize {
        self.depth
    }

    fn next_frame(&mut self) -> SourceResult<FrameStatus> {
        Ok(FrameStatus::Pending)
    }
}

/// Candidate reporting a fixed depth width and recording every probe
struct FakeCandidate {
    name: &'static str,
    width: u32,
    fails: bool,
    probes: ProbeLog,
}

impl SourceCandidate for FakeCandidate {
    fn name(&self) -> &'static str {
        self.name
    }

    fn open(
        &self,
        calibration_path: &Path,
        device_hint: Option<&str>,
    ) -> SourceResult<Box<dyn ImageSource>> {
        self.probes.lock().unwrap().push(self.name);
        if self.fails {
            return Err(SourceError::DeviceUnavailable(self.name.to_string()));
        }
        Ok(Box::new(FakeSource {
            core: SourceCore::new(
                SourceDescriptor::GenericUvc {
                    calibration: calibration_path.to_path_buf(),
                    device_hint: device_hint.map(str::to_string),
                },
                CalibrationProfile::default(),
            ),
            depth: ImageSize::new(self.width, 4),
        }))
    }
}

fn candidates(widths: &[(&'static str, u32)], probes: &ProbeLog) -> Vec<Box<dyn SourceCandidate>> {
    widths
        .iter()
        .map(|&(name, width)| {
            Box::new(FakeCandidate {
                name,
                width,
                fails: false,
                probes: Arc::clone(probes),
            }) as Box<dyn SourceCandidate>
        })
        .collect()
}

fn bridged(resolver: SourceResolver) -> SourceResolver {
    resolver.with_bridge(
        Arc::new(LocalBus::new()),
        BridgeTopics::from_config(&NodeConfig::default()),
    )
}

fn device_request() -> SourceRequest {
    SourceRequest {
        calibration: PathBuf::from("/nonexistent/calib.txt"),
        color_or_device: Some("/dev/video7".to_string()),
        depth_mask: None,
        imu_mask: None,
    }
}

#[test]
fn test_first_valid_candidate_wins() {
    let probes = ProbeLog::default();
    let resolver = SourceResolver::new(candidates(
        &[("first", 0), ("second", 640), ("third", 640)],
        &probes,
    ));

    let resolved = resolver.resolve(&device_request()).unwrap();
    assert_eq!(*probes.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(resolved.image.depth_image_size().width, 640);
    assert!(matches!(
        resolved.descriptor(),
        SourceDescriptor::GenericUvc { device_hint: Some(hint), .. } if hint == "/dev/video7"
    ));
}

#[test]
fn test_failing_candidate_is_skipped() {
    let probes = ProbeLog::default();
    let mut list = candidates(&[("working", 320)], &probes);
    list.insert(
        0,
        Box::new(FakeCandidate {
            name: "broken",
            width: 640,
            fails: true,
            probes: Arc::clone(&probes),
        }),
    );

    let resolved = SourceResolver::new(list).resolve(&device_request()).unwrap();
    assert_eq!(*probes.lock().unwrap(), vec!["broken", "working"]);
    assert_eq!(resolved.image.depth_image_size().width, 320);
}

#[test]
fn test_all_zero_width_falls_back_to_bridge() {
    let probes = ProbeLog::default();
    let resolver = bridged(SourceResolver::new(candidates(
        &[("a", 0), ("b", 0), ("c", 0)],
        &probes,
    )));

    let resolved = resolver.resolve(&device_request()).unwrap();
    assert_eq!(*probes.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(resolved.descriptor().kind(), "topic-bridge");
    assert_eq!(resolved.pose.name(), "topic-bridge");
    // selected even though no frame has arrived yet
    assert_eq!(resolved.image.depth_image_size().width, 0);
    assert!(!resolved.image.depth_image_size().is_valid());
}

#[test]
fn test_nothing_resolves_without_bridge() {
    let probes = ProbeLog::default();
    let resolver = SourceResolver::new(candidates(&[("a", 0)], &probes));
    assert!(resolver.resolve(&device_request()).is_none());
}

#[test]
fn test_file_masks_never_probe_devices() {
    let probes = ProbeLog::default();
    let resolver = bridged(SourceResolver::new(candidates(&[("live", 640)], &probes)));
    let request = SourceRequest {
        calibration: PathBuf::from("/nonexistent/calib.txt"),
        color_or_device: Some("/nonexistent/rgb/%04i.ppm".to_string()),
        depth_mask: Some("/nonexistent/depth/%04i.pgm".to_string()),
        imu_mask: None,
    };

    let resolved = resolver.resolve(&request).unwrap();
    assert!(probes.lock().unwrap().is_empty());
    assert_eq!(resolved.descriptor().kind(), "file-pair");
    assert!(resolved.imu.is_none());
    assert!(!resolved.descriptor().is_live_device());
}

#[test]
fn test_imu_mask_selects_imu_reader() {
    let probes = ProbeLog::default();
    let resolver = SourceResolver::new(candidates(&[("live", 640)], &probes));
    let request = SourceRequest {
        calibration: PathBuf::from("/nonexistent/calib.txt"),
        color_or_device: Some("rgb/%04i.ppm".to_string()),
        depth_mask: Some("depth/%04i.pgm".to_string()),
        imu_mask: Some("imu/%04i.txt".to_string()),
    };

    let resolved = resolver.resolve(&request).unwrap();
    assert!(probes.lock().unwrap().is_empty());
    assert_eq!(resolved.descriptor().kind(), "file-pair-imu");
    assert!(resolved.imu.is_some());
    assert_eq!(resolved.image.depth_image_size(), ImageSize::new(320, 240));
}

#[test]
fn test_unset_disparity_is_canonicalized() {
    let probes = ProbeLog::default();
    let resolver = SourceResolver::new(candidates(&[("live", 640)], &probes));

    let resolved = resolver.resolve(&device_request()).unwrap();
    let disparity = resolved.image.calibration().disparity;
    assert_eq!(disparity.kind, DisparityKind::Affine);
    assert_eq!(disparity.params, (0.001, 0.0));
}

#[test]
fn test_configured_disparity_is_kept() {
    let dir = std::env::temp_dir().join(format!("fusion-node-calib-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let calib = dir.join("calib.txt");
    std::fs::write(
        &calib,
        "640 480\n500 500\n320 240\n\n640 480\n570 570\n320 240\n\n\
         1 0 0 0\n0 1 0 0\n0 0 1 0\n\n1135.09 0.0819141\n",
    )
    .unwrap();

    let resolver = SourceResolver::new(Vec::new());
    let request = SourceRequest {
        calibration: calib,
        color_or_device: Some("rgb/%04i.ppm".to_string()),
        depth_mask: Some("depth/%04i.pgm".to_string()),
        imu_mask: None,
    };

    let resolved = resolver.resolve(&request).unwrap();
    std::fs::remove_dir_all(&dir).ok();
    assert_eq!(resolved.image.calibration().disparity, DisparityCalib::kinect());
}
