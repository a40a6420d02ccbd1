// SPDX-License-Identifier: GPL-3.0-only

//! IMU orientation readings
//!
//! One file per frame, named by a printf-style mask, holding a row-major
//! 3x3 rotation matrix as nine whitespace-separated numbers.

use super::file_reader::format_frame_path;
use crate::errors::{SourceError, SourceResult};
use std::path::Path;
use tracing::debug;

/// Device orientation at a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuMeasurement {
    pub rotation: [[f32; 3]; 3],
}

impl ImuMeasurement {
    pub fn parse(text: &str) -> SourceResult<Self> {
        let values = text
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f32>()
                    .map_err(|_| SourceError::Imu(format!("'{}' is not a number", token)))
            })
            .collect::<SourceResult<Vec<f32>>>()?;

        if values.len() < 9 {
            return Err(SourceError::Imu(format!(
                "expected 9 rotation values, found {}",
                values.len()
            )));
        }

        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            row.copy_from_slice(&values[i * 3..i * 3 + 3]);
        }
        Ok(Self { rotation })
    }
}

/// Orientation readings addressed by frame sequence number
///
/// Lookups are keyed by [`RgbdFrame::sequence`](super::RgbdFrame), so a
/// frame that fails to load never shifts later frames onto the wrong reading.
pub trait ImuSource: Send {
    /// Reading for frame `sequence`; `None` if there is none
    fn measurement_for(&mut self, sequence: u64) -> SourceResult<Option<ImuMeasurement>>;
}

/// Numbered IMU files on disk
pub struct ImuFileSource {
    mask: String,
}

impl ImuFileSource {
    pub fn new(mask: impl Into<String>) -> Self {
        Self { mask: mask.into() }
    }
}

impl ImuSource for ImuFileSource {
    fn measurement_for(&mut self, sequence: u64) -> SourceResult<Option<ImuMeasurement>> {
        let index = u32::try_from(sequence)
            .map_err(|_| SourceError::Imu(format!("frame {} out of range", sequence)))?;
        let path = format_frame_path(&self.mask, index);

        if !Path::new(&path).exists() {
            debug!(path = %path, "No IMU file, continuing without orientation");
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| SourceError::Imu(format!("{}: {}", path, e)))?;
        ImuMeasurement::parse(&text).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotation() {
        let m = ImuMeasurement::parse("1 0 0\n0 1 0\n0 0 1\n").unwrap();
        assert_eq!(m.rotation[1], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_short_file_rejected() {
        assert!(matches!(
            ImuMeasurement::parse("1 0 0 0 1"),
            Err(SourceError::Imu(_))
        ));
    }

    #[test]
    fn test_files_looked_up_by_sequence() {
        let dir = std::env::temp_dir().join(format!("fusion-node-imu-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("imu_0000.txt"), "0 -1 0 1 0 0 0 0 1").unwrap();
        std::fs::write(dir.join("imu_0002.txt"), "1 0 0 0 0 -1 0 1 0").unwrap();

        let mask = dir.join("imu_%04i.txt").to_string_lossy().to_string();
        let mut source = ImuFileSource::new(mask);
        let first = source.measurement_for(0).unwrap().unwrap();
        assert_eq!(first.rotation[0], [0.0, -1.0, 0.0]);
        assert!(source.measurement_for(1).unwrap().is_none());
        let third = source.measurement_for(2).unwrap().unwrap();
        assert_eq!(third.rotation[1], [0.0, 0.0, -1.0]);
        // Lookups do not consume readings
        assert_eq!(source.measurement_for(0).unwrap(), Some(first));

        std::fs::remove_dir_all(&dir).ok();
    }
}
