// SPDX-License-Identifier: GPL-3.0-only

//! Shared V4L2 helpers for the live device sources
//!
//! Device discovery (driver + pixel format matching), stream setup, and
//! the pixel conversions the depth and color nodes need.

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::{DepthImage, ImageSize, LatestSlot};
use crate::constants::devices::CAPTURE_BUFFERS;
use crate::constants::timing::{CAPTURE_RETRY_DELAY, FRAME_LOG_INTERVAL};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// A capture node that matched a driver and pixel format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatch {
    pub path: PathBuf,
    pub driver: String,
    pub card: String,
    /// Bus info, shared by the nodes of one physical device
    pub bus: String,
    pub fourcc: [u8; 4],
    pub size: ImageSize,
}

/// `/dev/video*` nodes in numeric order
pub fn list_video_nodes() -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };

    let mut nodes: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name.to_str()?.strip_prefix("video")?.parse().ok()?;
            Some((index, entry.path()))
        })
        .collect();
    nodes.sort();
    nodes.into_iter().map(|(_, path)| path).collect()
}

/// Probe one node: capture capable, driver in `drivers`, offers one of `fourccs`
pub fn probe_node(path: &Path, drivers: &[&str], fourccs: &[&[u8; 4]]) -> Option<DeviceMatch> {
    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return None;
    }
    if !drivers.is_empty() && !drivers.iter().any(|d| caps.driver == *d) {
        debug!(path = %path.display(), driver = %caps.driver, "Driver not handled here");
        return None;
    }

    let formats = dev.enum_formats().ok()?;
    let fourcc = fourccs
        .iter()
        .find(|wanted| formats.iter().any(|f| f.fourcc == FourCC::new(wanted)))?;

    let size = preferred_size(&dev, FourCC::new(fourcc))?;
    debug!(
        path = %path.display(),
        driver = %caps.driver,
        fourcc = %String::from_utf8_lossy(*fourcc),
        size = %size,
        "Matched capture node"
    );

    Some(DeviceMatch {
        path: path.to_path_buf(),
        driver: caps.driver,
        card: caps.card,
        bus: caps.bus,
        fourcc: **fourcc,
        size,
    })
}

/// First discrete frame size, or the largest stepwise size, or the current format
fn preferred_size(dev: &Device, fourcc: FourCC) -> Option<ImageSize> {
    if let Some(first) = dev
        .enum_framesizes(fourcc)
        .ok()
        .and_then(|sizes| sizes.into_iter().next())
    {
        return Some(match first.size {
            FrameSizeEnum::Discrete(d) => ImageSize::new(d.width, d.height),
            FrameSizeEnum::Stepwise(s) => ImageSize::new(s.max_width, s.max_height),
        });
    }
    let current = dev.format().ok()?;
    Some(ImageSize::new(current.width, current.height))
}

/// Find a node, trying the `hint` path first when given.
///
/// With a hint, only that node is considered.
pub fn find_capture_node(
    drivers: &[&str],
    fourccs: &[&[u8; 4]],
    hint: Option<&str>,
) -> Option<DeviceMatch> {
    if let Some(hint) = hint.filter(|h| h.starts_with("/dev/")) {
        return probe_node(Path::new(hint), drivers, fourccs);
    }
    list_video_nodes()
        .iter()
        .find_map(|path| probe_node(path, drivers, fourccs))
}

/// Another node on the same physical device offering one of `fourccs`
pub fn find_sibling_node(primary: &DeviceMatch, fourccs: &[&[u8; 4]]) -> Option<DeviceMatch> {
    list_video_nodes()
        .iter()
        .filter(|path| **path != primary.path)
        .filter_map(|path| probe_node(path, &[primary.driver.as_str()], fourccs))
        .find(|m| m.bus == primary.bus)
}

/// Open a node, select `fourcc` at `size`, and start a memory-mapped stream
pub fn open_stream(
    path: &Path,
    fourcc: &[u8; 4],
    size: ImageSize,
) -> Result<MmapStream<'static>, String> {
    let dev = Device::with_path(path)
        .map_err(|e| format!("Failed to open V4L2 device {}: {}", path.display(), e))?;

    let wanted = FourCC::new(fourcc);
    match dev.set_format(&Format::new(size.width, size.height, wanted)) {
        Ok(f) if f.fourcc == wanted && f.width == size.width && f.height == size.height => {
            info!(
                path = %path.display(),
                width = f.width,
                height = f.height,
                fourcc = ?f.fourcc,
                "Set V4L2 format"
            );
        }
        Ok(f) => {
            return Err(format!(
                "{} accepted {}x{} {:?} instead of the requested format",
                path.display(),
                f.width,
                f.height,
                f.fourcc
            ));
        }
        Err(e) => return Err(format!("Failed to set format on {}: {}", path.display(), e)),
    }

    MmapStream::with_buffers(&dev, Type::VideoCapture, CAPTURE_BUFFERS)
        .map_err(|e| format!("Failed to create buffer stream: {}", e))
}

/// Stream `node` on a capture thread, converting each buffer into `slot`
pub fn spawn_capture<T, F>(
    name: &str,
    node: &DeviceMatch,
    slot: LatestSlot<T>,
    mut convert: F,
) -> Result<CaptureLoopController, String>
where
    T: Send + 'static,
    F: FnMut(&[u8]) -> Option<T> + Send + 'static,
{
    let path = node.path.clone();
    let fourcc = node.fourcc;
    let size = node.size;
    let thread_name = name.to_string();
    let mut frames: u64 = 0;

    CaptureLoopController::start_with_init(
        name,
        move || open_stream(&path, &fourcc, size),
        move |stream| {
            match CaptureStream::next(stream) {
                Ok((buf, meta)) => {
                    frames += 1;
                    match convert(buf) {
                        Some(value) => slot.put(value),
                        None if frames % FRAME_LOG_INTERVAL == 0 => {
                            warn!(name = %thread_name, frame = frames, bytes = buf.len(), "Dropping malformed buffer");
                        }
                        None => {}
                    }
                    if frames % FRAME_LOG_INTERVAL == 0 {
                        debug!(name = %thread_name, frame = frames, sequence = meta.sequence, "Frame captured");
                    }
                }
                Err(e) => {
                    warn!(name = %thread_name, error = %e, "Failed to capture frame");
                    std::thread::sleep(CAPTURE_RETRY_DELAY);
                }
            }
            LoopAction::Continue
        },
    )
}

/// Unpack Y10B (10-bit samples, MSB first, 4 pixels in 5 bytes)
pub fn unpack_y10b(raw: &[u8], size: ImageSize) -> Option<DepthImage> {
    let count = size.width as usize * size.height as usize;
    if raw.len() * 8 < count * 10 {
        warn!(
            got = raw.len(),
            expected = y10b_packed_size(size),
            "Y10B buffer too short"
        );
        return None;
    }

    let mut samples = Vec::with_capacity(count);
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut bytes = raw.iter();
    while samples.len() < count {
        while bits < 10 {
            acc = (acc << 8) | u32::from(*bytes.next()?);
            bits += 8;
        }
        bits -= 10;
        samples.push(((acc >> bits) & 0x3FF) as u16);
    }
    DepthImage::from_raw(size.width, size.height, samples)
}

pub fn y10b_packed_size(size: ImageSize) -> usize {
    (size.width as usize * size.height as usize * 10).div_ceil(8)
}

/// Little-endian 16-bit depth (Z16 / Y16)
pub fn depth_from_le16(raw: &[u8], size: ImageSize) -> Option<DepthImage> {
    let count = size.width as usize * size.height as usize;
    let bytes = raw.get(..count * 2)?;
    let samples = bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    DepthImage::from_raw(size.width, size.height, samples)
}

/// Convert a color capture buffer to RGB
pub fn color_to_rgb(raw: &[u8], fourcc: &[u8; 4], size: ImageSize) -> Option<RgbImage> {
    match fourcc {
        b"RGB3" => {
            let len = size.width as usize * size.height as usize * 3;
            RgbImage::from_raw(size.width, size.height, raw.get(..len)?.to_vec())
        }
        b"YUYV" => yuyv_to_rgb(raw, size),
        b"MJPG" => image::load_from_memory_with_format(raw, image::ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| debug!(error = %e, "Dropping undecodable MJPG frame"))
            .ok(),
        _ => None,
    }
}

fn yuyv_to_rgb(raw: &[u8], size: ImageSize) -> Option<RgbImage> {
    let len = size.width as usize * size.height as usize * 2;
    let raw = raw.get(..len)?;
    let mut rgb = Vec::with_capacity(size.width as usize * size.height as usize * 3);

    for chunk in raw.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    RgbImage::from_raw(size.width, size.height, rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = f32::from(y) - 16.0;
    let d = f32::from(u) - 128.0;
    let e = f32::from(v) - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_y10b_unpacking() {
        // P0 = 1023, P1 = 512, P2 = 256, P3 = 0
        let raw = [255u8, 224, 4, 0, 0];
        let depth = unpack_y10b(&raw, ImageSize::new(2, 2)).unwrap();
        assert_eq!(depth.as_raw(), &vec![1023, 512, 256, 0]);
    }

    #[test]
    fn test_y10b_short_buffer() {
        assert!(unpack_y10b(&[0u8; 4], ImageSize::new(2, 2)).is_none());
        assert_eq!(y10b_packed_size(ImageSize::new(640, 480)), 384_000);
    }

    #[test]
    fn test_le16_depth() {
        let depth = depth_from_le16(&[0xE8, 0x03, 0x00, 0x00], ImageSize::new(2, 1)).unwrap();
        assert_eq!(depth.as_raw(), &vec![1000, 0]);
    }

    #[test]
    fn test_yuyv_gray() {
        let rgb = color_to_rgb(&[128, 128, 128, 128], b"YUYV", ImageSize::new(2, 1)).unwrap();
        let px = rgb.get_pixel(0, 0).0;
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }
}
