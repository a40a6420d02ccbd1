// SPDX-License-Identifier: GPL-3.0-only

//! Recorded frame pairs on disk
//!
//! Color and depth frames are addressed by printf-style masks such as
//! `Frames/%04i.ppm`, numbered from 0. The sequence ends at the first index
//! for which either file is missing.

use super::{
    DepthImage, FrameStatus, ImageSize, ImageSource, RgbdFrame, SourceCore, SourceDescriptor,
};
use crate::calibration::{CalibrationProfile, Intrinsics};
use crate::errors::{SourceError, SourceResult};
use image::RgbImage;
use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Expand the frame placeholder in `mask`.
///
/// Supports `%d`, `%i`, `%u` with optional zero padding and width
/// (`%04i`, `%5d`), and `%%` for a literal percent sign.
pub fn format_frame_path(mask: &str, index: u32) -> String {
    let mut out = String::with_capacity(mask.len() + 8);
    let mut chars = mask.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut spec = String::from("%");
        let zero_pad = chars.peek() == Some(&'0');
        let mut width = 0usize;
        while let Some(&d) = chars.peek() {
            let Some(digit) = d.to_digit(10) else { break };
            spec.push(d);
            width = width * 10 + digit as usize;
            chars.next();
        }

        match chars.peek() {
            Some('d' | 'i' | 'u') => {
                chars.next();
                if zero_pad {
                    out.push_str(&format!("{:0width$}", index, width = width));
                } else {
                    out.push_str(&format!("{:width$}", index, width = width));
                }
            }
            _ => out.push_str(&spec),
        }
    }

    out
}

fn load_color(path: &str) -> SourceResult<RgbImage> {
    Ok(image::open(path)
        .map_err(|e| SourceError::FrameRead(format!("{}: {}", path, e)))?
        .to_rgb8())
}

fn load_depth(path: &str) -> SourceResult<DepthImage> {
    Ok(image::open(path)
        .map_err(|e| SourceError::FrameRead(format!("{}: {}", path, e)))?
        .to_luma16())
}

fn check_size(actual: ImageSize, expected: ImageSize) -> SourceResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(SourceError::FrameSizeMismatch {
            expected: (expected.width, expected.height),
            actual: (actual.width, actual.height),
        })
    }
}

/// Paths for one frame, or `None` once either file is missing
fn frame_paths(color_mask: &str, depth_mask: &str, index: u32) -> Option<(String, String)> {
    let color = format_frame_path(color_mask, index);
    let depth = format_frame_path(depth_mask, index);
    if Path::new(&color).exists() && Path::new(&depth).exists() {
        Some((color, depth))
    } else {
        debug!(color = %color, depth = %depth, "Frame files not found, sequence ends");
        None
    }
}

/// Color + depth frame pairs at the calibration's image sizes
pub struct ImageFileReader {
    core: SourceCore,
    color_mask: String,
    depth_mask: String,
    index: u32,
}

impl ImageFileReader {
    pub fn new(calibration_path: &Path, color_mask: &str, depth_mask: &str) -> Self {
        let calibration = CalibrationProfile::load_or_default(calibration_path);
        info!(color = color_mask, depth = depth_mask, "Reading frames from disk");
        Self::with_calibration(calibration_path, calibration, color_mask, depth_mask)
    }

    pub fn with_calibration(
        calibration_path: &Path,
        calibration: CalibrationProfile,
        color_mask: &str,
        depth_mask: &str,
    ) -> Self {
        let descriptor = SourceDescriptor::FilePair {
            calibration: PathBuf::from(calibration_path),
            color_mask: color_mask.to_string(),
            depth_mask: depth_mask.to_string(),
        };
        Self {
            core: SourceCore::new(descriptor, calibration),
            color_mask: color_mask.to_string(),
            depth_mask: depth_mask.to_string(),
            index: 0,
        }
    }
}

impl ImageSource for ImageFileReader {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    fn rgb_image_size(&self) -> ImageSize {
        let k = &self.core.calibration.rgb;
        ImageSize::new(k.width, k.height)
    }

    fn depth_image_size(&self) -> ImageSize {
        let k = &self.core.calibration.depth;
        ImageSize::new(k.width, k.height)
    }

    fn next_frame(&mut self) -> SourceResult<FrameStatus> {
        let Some((color_path, depth_path)) =
            frame_paths(&self.color_mask, &self.depth_mask, self.index)
        else {
            return Ok(FrameStatus::Exhausted);
        };
        let sequence = u64::from(self.index);
        self.index += 1;

        let rgb = load_color(&color_path)?;
        let depth = load_depth(&depth_path)?;
        check_size(ImageSize::new(rgb.width(), rgb.height()), self.rgb_image_size())?;
        check_size(
            ImageSize::new(depth.width(), depth.height()),
            self.depth_image_size(),
        )?;

        Ok(FrameStatus::Frame(RgbdFrame {
            rgb,
            depth,
            sequence,
        }))
    }
}

/// Frame pairs rescaled to a fixed internal size, paired with IMU data
pub struct RawFileReader {
    core: SourceCore,
    color_mask: String,
    depth_mask: String,
    frame_size: ImageSize,
    downscale: f32,
    index: u32,
}

impl RawFileReader {
    /// The calibration intrinsics are scaled by `downscale` to match the
    /// rescaled frames.
    pub fn new(
        calibration_path: &Path,
        color_mask: &str,
        depth_mask: &str,
        imu_mask: &str,
        frame_size: ImageSize,
        downscale: f32,
    ) -> Self {
        let mut calibration = CalibrationProfile::load_or_default(calibration_path);
        calibration.rgb = scale_intrinsics(&calibration.rgb, downscale);
        calibration.depth = scale_intrinsics(&calibration.depth, downscale);

        info!(
            color = color_mask,
            depth = depth_mask,
            imu = imu_mask,
            size = %frame_size,
            downscale,
            "Reading frames with IMU data from disk"
        );

        let descriptor = SourceDescriptor::FilePairWithImu {
            calibration: PathBuf::from(calibration_path),
            color_mask: color_mask.to_string(),
            depth_mask: depth_mask.to_string(),
            imu_mask: imu_mask.to_string(),
        };
        Self {
            core: SourceCore::new(descriptor, calibration),
            color_mask: color_mask.to_string(),
            depth_mask: depth_mask.to_string(),
            frame_size,
            downscale,
            index: 0,
        }
    }

    fn scaled(&self, width: u32, height: u32) -> (u32, u32) {
        (
            (width as f32 * self.downscale).round() as u32,
            (height as f32 * self.downscale).round() as u32,
        )
    }
}

fn scale_intrinsics(k: &Intrinsics, factor: f32) -> Intrinsics {
    Intrinsics {
        width: (k.width as f32 * factor).round() as u32,
        height: (k.height as f32 * factor).round() as u32,
        fx: k.fx * factor,
        fy: k.fy * factor,
        cx: k.cx * factor,
        cy: k.cy * factor,
    }
}

impl ImageSource for RawFileReader {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    fn rgb_image_size(&self) -> ImageSize {
        self.frame_size
    }

    fn depth_image_size(&self) -> ImageSize {
        self.frame_size
    }

    fn next_frame(&mut self) -> SourceResult<FrameStatus> {
        let Some((color_path, depth_path)) =
            frame_paths(&self.color_mask, &self.depth_mask, self.index)
        else {
            return Ok(FrameStatus::Exhausted);
        };
        let sequence = u64::from(self.index);
        self.index += 1;

        let color = load_color(&color_path)?;
        let (w, h) = self.scaled(color.width(), color.height());
        let rgb = imageops::resize(&color, w, h, FilterType::Triangle);

        let depth_full = load_depth(&depth_path)?;
        let (w, h) = self.scaled(depth_full.width(), depth_full.height());
        // Nearest keeps raw depth values unblended
        let depth = imageops::resize(&depth_full, w, h, FilterType::Nearest);

        check_size(ImageSize::new(rgb.width(), rgb.height()), self.frame_size)?;
        check_size(ImageSize::new(depth.width(), depth.height()), self.frame_size)?;

        Ok(FrameStatus::Frame(RgbdFrame {
            rgb,
            depth,
            sequence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_placeholders() {
        assert_eq!(format_frame_path("f/%04i.ppm", 7), "f/0007.ppm");
        assert_eq!(format_frame_path("f/%d.png", 12), "f/12.png");
        assert_eq!(format_frame_path("f/%3d.png", 5), "f/  5.png");
        assert_eq!(format_frame_path("100%%_%05u", 42), "100%_00042");
        assert_eq!(format_frame_path("plain.png", 3), "plain.png");
        assert_eq!(format_frame_path("odd%s", 3), "odd%s");
    }

    #[test]
    fn test_scale_intrinsics_halves() {
        let k = scale_intrinsics(&Intrinsics::default(), 0.5);
        assert_eq!((k.width, k.height), (320, 240));
        assert_eq!(k.fx, 290.0);
        assert_eq!(k.cx, 160.0);
    }

    #[test]
    fn test_reader_ends_at_missing_frame() {
        let dir = std::env::temp_dir().join(format!("fusion-node-frames-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::new(4, 3).save(dir.join("0000.png")).unwrap();
        DepthImage::from_pixel(4, 3, image::Luma([1000u16]))
            .save(dir.join("0000_d.png"))
            .unwrap();

        let mut calib = CalibrationProfile::default();
        calib.rgb.width = 4;
        calib.rgb.height = 3;
        calib.depth = calib.rgb;

        let color = dir.join("%04i.png").to_string_lossy().to_string();
        let depth = dir.join("%04i_d.png").to_string_lossy().to_string();
        let mut reader =
            ImageFileReader::with_calibration(Path::new("calib.txt"), calib, &color, &depth);

        match reader.next_frame().unwrap() {
            FrameStatus::Frame(frame) => {
                assert_eq!(frame.sequence, 0);
                assert_eq!(frame.depth.get_pixel(0, 0).0, [1000]);
            }
            other => panic!("expected a frame, got {:?}", other),
        }
        assert!(matches!(reader.next_frame().unwrap(), FrameStatus::Exhausted));

        std::fs::remove_dir_all(&dir).ok();
    }
}
