// SPDX-License-Identifier: GPL-3.0-only

//! Wire messages exchanged over a [`super::Transport`]

use crate::backends::source::DepthImage;
use crate::engine::Pose;
use crate::errors::{SourceError, SourceResult};
use crate::pipelines::mesh::{ExternalMesh, PointCloud};
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub frame_id: String,
    /// Nanoseconds since the Unix epoch
    pub stamp_ns: i64,
}

impl Header {
    pub fn now(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp_ns: chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default(),
        }
    }
}

/// Pixel encodings understood by the topic bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Rgb8,
    Rgba8,
    Bgr8,
    Mono16,
    Float32,
}

impl ImageEncoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rgb8" => Some(Self::Rgb8),
            "rgba8" => Some(Self::Rgba8),
            "bgr8" => Some(Self::Bgr8),
            "mono16" | "16UC1" => Some(Self::Mono16),
            "32FC1" => Some(Self::Float32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rgb8 => "rgb8",
            Self::Rgba8 => "rgba8",
            Self::Bgr8 => "bgr8",
            Self::Mono16 => "16UC1",
            Self::Float32 => "32FC1",
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Float32 => 4,
            Self::Mono16 => 2,
        }
    }
}

/// Raw image, row-major, little-endian for multi-byte encodings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMessage {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    /// Bytes per row
    pub step: u32,
    pub data: Vec<u8>,
}

impl ImageMessage {
    pub fn from_rgb(header: Header, image: &RgbImage) -> Self {
        Self {
            header,
            width: image.width(),
            height: image.height(),
            encoding: ImageEncoding::Rgb8.name().to_string(),
            step: image.width() * 3,
            data: image.as_raw().clone(),
        }
    }

    pub fn from_depth(header: Header, image: &DepthImage) -> Self {
        Self {
            header,
            width: image.width(),
            height: image.height(),
            encoding: ImageEncoding::Mono16.name().to_string(),
            step: image.width() * 2,
            data: image.as_raw().iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn encoding(&self) -> SourceResult<ImageEncoding> {
        ImageEncoding::parse(&self.encoding).ok_or_else(|| {
            SourceError::FrameRead(format!("unsupported encoding '{}'", self.encoding))
        })
    }

    /// Packed rows, validated against width/height/step
    fn rows(&self, encoding: ImageEncoding) -> SourceResult<impl Iterator<Item = &[u8]>> {
        let row_bytes = self.width as usize * encoding.bytes_per_pixel();
        let step = self.step as usize;
        if step < row_bytes || self.data.len() < step * self.height as usize {
            return Err(SourceError::FrameRead(format!(
                "{}x{} {} image has {} bytes with step {}",
                self.width,
                self.height,
                self.encoding,
                self.data.len(),
                self.step
            )));
        }
        Ok(self
            .data
            .chunks(step.max(1))
            .take(self.height as usize)
            .map(move |row| &row[..row_bytes]))
    }

    pub fn to_rgb(&self) -> SourceResult<RgbImage> {
        let encoding = self.encoding()?;
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for row in self.rows(encoding)? {
            match encoding {
                ImageEncoding::Rgb8 => pixels.extend_from_slice(row),
                ImageEncoding::Bgr8 => {
                    for px in row.chunks_exact(3) {
                        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
                    }
                }
                ImageEncoding::Rgba8 => {
                    for px in row.chunks_exact(4) {
                        pixels.extend_from_slice(&px[..3]);
                    }
                }
                ImageEncoding::Mono16 | ImageEncoding::Float32 => {
                    return Err(SourceError::FrameRead(format!(
                        "'{}' is not a color encoding",
                        self.encoding
                    )));
                }
            }
        }
        RgbImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| SourceError::FrameRead("color buffer size mismatch".to_string()))
    }

    /// Depth as raw millimeters; float images are read as meters
    pub fn to_depth(&self) -> SourceResult<DepthImage> {
        let encoding = self.encoding()?;
        let mut samples = Vec::with_capacity(self.width as usize * self.height as usize);
        for row in self.rows(encoding)? {
            match encoding {
                ImageEncoding::Mono16 => samples.extend(
                    row.chunks_exact(2)
                        .map(|b| u16::from_le_bytes([b[0], b[1]])),
                ),
                ImageEncoding::Float32 => samples.extend(row.chunks_exact(4).map(|b| {
                    let meters = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    if meters.is_finite() && meters > 0.0 {
                        (meters * 1000.0).round().min(u16::MAX as f32) as u16
                    } else {
                        0
                    }
                })),
                _ => {
                    return Err(SourceError::FrameRead(format!(
                        "'{}' is not a depth encoding",
                        self.encoding
                    )));
                }
            }
        }
        DepthImage::from_raw(self.width, self.height, samples)
            .ok_or_else(|| SourceError::FrameRead("depth buffer size mismatch".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedTransform {
    /// Parent frame
    pub header: Header,
    pub child_frame_id: String,
    pub translation: [f64; 3],
    /// Unit quaternion `[x, y, z, w]`
    pub rotation: [f64; 4],
}

impl StampedTransform {
    pub fn to_pose(&self) -> Pose {
        Pose::from_quaternion(
            self.translation.map(|v| v as f32),
            self.rotation.map(|v| v as f32),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformMessage {
    pub transforms: Vec<StampedTransform>,
}

/// Unindexed points, flattened `[x0, y0, z0, x1, ...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloudMessage {
    pub header: Header,
    pub points: Vec<f32>,
}

impl PointCloudMessage {
    pub fn new(header: Header, cloud: &PointCloud) -> Self {
        Self {
            header,
            points: cloud.flatten(),
        }
    }

    pub fn point_count(&self) -> usize {
        self.points.len() / 3
    }
}

/// Indexed triangle mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMessage {
    pub header: Header,
    /// Flattened vertex positions
    pub vertices: Vec<f32>,
    /// Flattened triangle indices
    pub triangles: Vec<u32>,
}

impl MeshMessage {
    pub fn new(header: Header, mesh: &ExternalMesh) -> Self {
        Self {
            header,
            vertices: mesh.vertices.iter().flat_map(|v| v.to_array()).collect(),
            triangles: mesh.triangles.iter().flatten().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Message {
    Image(ImageMessage),
    Transform(TransformMessage),
    PointCloud(PointCloudMessage),
    Mesh(MeshMessage),
}
