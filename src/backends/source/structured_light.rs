// SPDX-License-Identifier: GPL-3.0-only

//! Structured-light USB depth sensors
//!
//! Streams through freedepth's userspace driver, which unbinds the kernel
//! driver for the duration of the session and rebinds it on shutdown. The
//! device hint is the freedepth sensor index.
//!
//! Without the `freedepth` feature (or off x86_64) the candidate reports a
//! zero-width source so resolution moves on to the next candidate.

use super::resolver::SourceCandidate;
use super::{ImageSource, SourceDescriptor};
use crate::calibration::CalibrationProfile;
use crate::errors::SourceResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredLightCandidate;

impl SourceCandidate for StructuredLightCandidate {
    fn name(&self) -> &'static str {
        "structured-light"
    }

    fn open(
        &self,
        calibration_path: &Path,
        device_hint: Option<&str>,
    ) -> SourceResult<Box<dyn ImageSource>> {
        let descriptor = SourceDescriptor::StructuredLight {
            calibration: PathBuf::from(calibration_path),
            device_hint: device_hint.map(str::to_string),
        };
        let calibration = CalibrationProfile::load_or_default(calibration_path);

        #[cfg(all(target_arch = "x86_64", feature = "freedepth"))]
        {
            native::open(descriptor, calibration, device_hint)
        }

        #[cfg(not(all(target_arch = "x86_64", feature = "freedepth")))]
        {
            tracing::info!("Built without freedepth, structured-light sensors unavailable");
            Ok(Box::new(super::UnavailableSource::new(
                descriptor,
                calibration,
            )))
        }
    }
}

#[cfg(all(target_arch = "x86_64", feature = "freedepth"))]
mod native {
    use super::super::frame_loop::{CaptureLoopController, LoopAction};
    use super::super::{
        DepthImage, FrameStatus, ImageSize, ImageSource, LatestSlot, RgbdFrame, SourceCore,
        SourceDescriptor,
    };
    use crate::calibration::{CalibrationProfile, DisparityCalib};
    use crate::constants::devices::STRUCTURED_LIGHT_DEPTH_SIZE;
    use crate::errors::{SourceError, SourceResult};
    use freedepth::{DepthFormat, DepthFrame, KinectStreamer, Resolution, VideoFormat, VideoFrame};
    use image::RgbImage;
    use std::sync::mpsc::{Receiver, TryRecvError};
    use std::time::Duration;
    use tracing::{debug, info, warn};

    pub fn open(
        descriptor: SourceDescriptor,
        mut calibration: CalibrationProfile,
        device_hint: Option<&str>,
    ) -> SourceResult<Box<dyn ImageSource>> {
        let index = match device_hint {
            Some(hint) => hint.parse::<usize>().map_err(|_| {
                SourceError::DeviceUnavailable(format!("'{}' is not a sensor index", hint))
            })?,
            None => 0,
        };

        let devices = freedepth::enumerate_devices()
            .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?;
        let Some(device) = devices.get(index) else {
            return Err(SourceError::DeviceUnavailable(format!(
                "structured-light sensor {} not found ({} connected)",
                index,
                devices.len()
            )));
        };
        info!(index, name = %device.name, "Opening structured-light sensor");

        // Frames arrive already converted to millimeters
        calibration.disparity = DisparityCalib::millimeters();

        let slot = LatestSlot::new();
        let producer = slot.clone();
        let capture = CaptureLoopController::start_with_init(
            "structured-light",
            move || SensorStream::start(index),
            move |stream| stream.pump(&producer),
        )
        .map_err(SourceError::DeviceUnavailable)?;

        Ok(Box::new(StructuredLightSource {
            core: SourceCore::new(descriptor, calibration),
            slot,
            capture,
        }))
    }

    pub struct StructuredLightSource {
        core: SourceCore,
        slot: LatestSlot<RgbdFrame>,
        capture: CaptureLoopController,
    }

    impl ImageSource for StructuredLightSource {
        fn core(&self) -> &SourceCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut SourceCore {
            &mut self.core
        }

        fn rgb_image_size(&self) -> ImageSize {
            STRUCTURED_LIGHT_DEPTH_SIZE.into()
        }

        fn depth_image_size(&self) -> ImageSize {
            STRUCTURED_LIGHT_DEPTH_SIZE.into()
        }

        fn next_frame(&mut self) -> SourceResult<FrameStatus> {
            match self.slot.take() {
                Some(frame) => Ok(FrameStatus::Frame(frame)),
                None if self.capture.is_running() => Ok(FrameStatus::Pending),
                None => Ok(FrameStatus::Exhausted),
            }
        }
    }

    /// Lives on the capture thread for the whole session
    struct SensorStream {
        streamer: KinectStreamer,
        video_rx: Receiver<VideoFrame>,
        depth_rx: Receiver<DepthFrame>,
        converter: freedepth::DepthToMm,
        last_rgb: Option<RgbImage>,
        sequence: u64,
    }

    impl SensorStream {
        fn start(index: usize) -> Result<Self, String> {
            let mut streamer = KinectStreamer::new(index)
                .map_err(|e| format!("Failed to create depth camera streamer: {}", e))?;
            let (video_rx, depth_rx) = streamer
                .start(VideoFormat::Bayer, Resolution::Medium, DepthFormat::Depth11Bit)
                .map_err(|e| format!("Failed to start streaming: {}", e))?;
            let converter = streamer.create_depth_registration().depth_to_mm().clone();

            Ok(Self {
                streamer,
                video_rx,
                depth_rx,
                converter,
                last_rgb: None,
                sequence: 0,
            })
        }

        fn pump(&mut self, slot: &LatestSlot<RgbdFrame>) -> LoopAction {
            let mut idle = true;

            match self.video_rx.try_recv() {
                Ok(frame) => {
                    idle = false;
                    let (w, h) = (frame.width as u32, frame.height as u32);
                    let mut rgb = vec![0u8; w as usize * h as usize * 3];
                    freedepth::convert_bayer_to_rgb(&frame.data, &mut rgb, frame.width, frame.height);
                    self.last_rgb = RgbImage::from_raw(w, h, rgb);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    debug!("Video channel disconnected");
                    return LoopAction::Stop;
                }
            }

            match self.depth_rx.try_recv() {
                Ok(frame) => {
                    idle = false;
                    if let Some(depth) = self.depth_mm(&frame)
                        && let Some(rgb) = self.last_rgb.clone()
                    {
                        self.sequence += 1;
                        slot.put(RgbdFrame {
                            rgb,
                            depth,
                            sequence: self.sequence,
                        });
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    debug!("Depth channel disconnected");
                    return LoopAction::Stop;
                }
            }

            if idle {
                std::thread::sleep(Duration::from_micros(100));
            }
            LoopAction::Continue
        }

        fn depth_mm(&self, frame: &DepthFrame) -> Option<DepthImage> {
            let raw = frame.as_u16()?;
            let mut mm = vec![0u16; raw.len()];
            self.converter.convert_frame(raw, &mut mm);
            DepthImage::from_raw(frame.width as u32, frame.height as u32, mm)
        }
    }

    impl Drop for SensorStream {
        fn drop(&mut self) {
            self.streamer.stop();
            if let Err(e) = self.streamer.rebind_driver() {
                warn!("Failed to rebind kernel driver: {}", e);
            }
            info!(frames = self.sequence, "Structured-light stream stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(all(target_arch = "x86_64", feature = "freedepth")))]
    #[test]
    fn test_without_backend_reports_zero_width() {
        let source = StructuredLightCandidate
            .open(Path::new("/nonexistent/calib.txt"), None)
            .unwrap();
        assert!(!source.depth_image_size().is_valid());
    }

    #[test]
    fn test_candidate_name() {
        assert_eq!(StructuredLightCandidate.name(), "structured-light");
    }
}
