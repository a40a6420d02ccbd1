// SPDX-License-Identifier: GPL-3.0-only

//! RGB-D calibration profiles
//!
//! A calibration file is a whitespace-separated list of numbers:
//!
//! ```text
//! 640 480          # RGB intrinsics: size
//! 504.26 503.90    #                 fx fy
//! 352.45 272.20    #                 cx cy
//!
//! 640 480          # depth intrinsics, same layout
//! 573.71 574.39
//! 346.47 249.03
//!
//! 1 0 0 0          # depth-to-RGB extrinsic, 3x4 row-major
//! 0 1 0 0
//! 0 0 1 0
//!
//! 1135.09 0.0819   # disparity: Kinect (a b), or `affine a b`
//! ```
//!
//! The disparity line is optional. Without it the profile keeps the `(0, 0)`
//! sentinel, which [`CalibrationProfile::canonicalize`] turns into a raw
//! millimeter transform.

use crate::constants::calibration as defaults;
use crate::errors::{SourceError, SourceResult};
use std::path::Path;
use tracing::{error, info};

/// Pinhole intrinsics for one sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Default for Intrinsics {
    fn default() -> Self {
        let (width, height) = defaults::DEFAULT_IMAGE_SIZE;
        Self {
            width,
            height,
            fx: defaults::DEFAULT_FOCAL,
            fy: defaults::DEFAULT_FOCAL,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        }
    }
}

/// Rigid transform from the depth sensor to the RGB sensor (3x4, row-major)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    pub matrix: [[f32; 4]; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        }
    }
}

/// How raw depth samples map to meters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisparityKind {
    /// Kinect disparity: `8 * b * fx / (a - d)`
    Kinect,
    /// Linear: `a * d + b`
    Affine,
}

/// Disparity-to-depth transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisparityCalib {
    pub kind: DisparityKind,
    /// `(a, b)`; `(0, 0)` means "not supplied"
    pub params: (f32, f32),
}

impl Default for DisparityCalib {
    fn default() -> Self {
        Self {
            kind: DisparityKind::Kinect,
            params: (0.0, 0.0),
        }
    }
}

impl DisparityCalib {
    /// Raw millimeter depth
    pub fn millimeters() -> Self {
        Self {
            kind: DisparityKind::Affine,
            params: (defaults::AFFINE_MM_SCALE, 0.0),
        }
    }

    /// Standard Kinect transform
    pub fn kinect() -> Self {
        Self {
            kind: DisparityKind::Kinect,
            params: (defaults::KINECT_DISPARITY_A, defaults::KINECT_DISPARITY_B),
        }
    }

    /// True when the `(0, 0)` sentinel is still in place
    pub fn is_unset(&self) -> bool {
        self.params == (0.0, 0.0)
    }

    /// Convert one raw sample to meters; `None` for invalid samples
    pub fn depth_meters(&self, raw: u16, depth_fx: f32) -> Option<f32> {
        if raw == 0 {
            return None;
        }
        let (a, b) = self.params;
        let d = raw as f32;
        let meters = match self.kind {
            DisparityKind::Affine => a * d + b,
            DisparityKind::Kinect => {
                let denom = a - d;
                if denom <= 0.0 {
                    return None;
                }
                8.0 * b * depth_fx / denom
            }
        };
        (meters.is_finite() && meters > 0.0).then_some(meters)
    }
}

/// Full RGB-D calibration owned by an input source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationProfile {
    pub rgb: Intrinsics,
    pub depth: Intrinsics,
    pub depth_to_rgb: Extrinsics,
    pub disparity: DisparityCalib,
}

impl CalibrationProfile {
    /// Parse a calibration file
    pub fn from_file(path: &Path) -> SourceResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Calibration(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Read a calibration file, falling back to defaults when it is unusable
    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(calib) => {
                info!(path = %path.display(), "Using calibration file");
                calib
            }
            Err(e) => {
                error!(error = %e, "Could not read calibration file, using defaults");
                Self::default()
            }
        }
    }

    /// Parse calibration text (see module docs for the layout)
    pub fn parse(text: &str) -> SourceResult<Self> {
        let mut tokens = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default())
            .flat_map(str::split_whitespace)
            .peekable();

        let rgb = read_intrinsics(&mut tokens, "rgb")?;
        let depth = read_intrinsics(&mut tokens, "depth")?;

        let mut depth_to_rgb = Extrinsics::default();
        for row in depth_to_rgb.matrix.iter_mut() {
            for value in row.iter_mut() {
                *value = next_number(&mut tokens, "extrinsics")?;
            }
        }

        let disparity = match tokens.peek().copied() {
            None => DisparityCalib::default(),
            Some("affine") => {
                tokens.next();
                DisparityCalib {
                    kind: DisparityKind::Affine,
                    params: (
                        next_number(&mut tokens, "disparity")?,
                        next_number(&mut tokens, "disparity")?,
                    ),
                }
            }
            Some(_) => DisparityCalib {
                kind: DisparityKind::Kinect,
                params: (
                    next_number(&mut tokens, "disparity")?,
                    next_number(&mut tokens, "disparity")?,
                ),
            },
        };

        Ok(Self {
            rgb,
            depth,
            depth_to_rgb,
            disparity,
        })
    }

    /// Replace an unset disparity transform with raw millimeters.
    ///
    /// Returns true if the profile was changed.
    pub fn canonicalize(&mut self) -> bool {
        if self.disparity.is_unset() {
            self.disparity = DisparityCalib::millimeters();
            true
        } else {
            false
        }
    }
}

fn next_number<'a, I>(tokens: &mut I, section: &str) -> SourceResult<f32>
where
    I: Iterator<Item = &'a str>,
{
    let token = tokens
        .next()
        .ok_or_else(|| SourceError::Calibration(format!("{} section is truncated", section)))?;
    token.parse::<f32>().map_err(|_| {
        SourceError::Calibration(format!("{} section: '{}' is not a number", section, token))
    })
}

fn read_intrinsics<'a, I>(tokens: &mut I, section: &str) -> SourceResult<Intrinsics>
where
    I: Iterator<Item = &'a str>,
{
    let width = next_number(tokens, section)?;
    let height = next_number(tokens, section)?;
    if width < 0.0 || height < 0.0 {
        return Err(SourceError::Calibration(format!(
            "{} section: negative image size",
            section
        )));
    }
    Ok(Intrinsics {
        width: width as u32,
        height: height as u32,
        fx: next_number(tokens, section)?,
        fy: next_number(tokens, section)?,
        cx: next_number(tokens, section)?,
        cy: next_number(tokens, section)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEDDY: &str = "640 480\n504.261 503.905\n352.457 272.202\n\n\
                         640 480\n573.71 574.394\n346.471 249.031\n\n\
                         0.999749 0.00518867 0.0217975 0.0243073\n\
                         -0.0051649 0.999986 -0.0011465 -0.000166518\n\
                         -0.0218031 0.00103363 0.999762 0.0151706\n\n\
                         1135.09 0.0819141\n";

    #[test]
    fn test_parse_kinect_profile() {
        let calib = CalibrationProfile::parse(TEDDY).unwrap();
        assert_eq!(calib.depth.width, 640);
        assert_eq!(calib.depth.fx, 573.71);
        assert_eq!(calib.disparity.kind, DisparityKind::Kinect);
        assert_eq!(calib.disparity.params, (1135.09, 0.0819141));
    }

    #[test]
    fn test_parse_affine_profile() {
        let text = TEDDY.replace("1135.09 0.0819141", "affine 0.0002 0.0");
        let calib = CalibrationProfile::parse(&text).unwrap();
        assert_eq!(calib.disparity.kind, DisparityKind::Affine);
        assert_eq!(calib.disparity.params, (0.0002, 0.0));
    }

    #[test]
    fn test_missing_disparity_is_sentinel() {
        let text = TEDDY.replace("1135.09 0.0819141", "");
        let calib = CalibrationProfile::parse(&text).unwrap();
        assert!(calib.disparity.is_unset());
    }

    #[test]
    fn test_truncated_intrinsics_rejected() {
        assert!(CalibrationProfile::parse("640 480\n504.2").is_err());
    }

    #[test]
    fn test_canonicalize_only_touches_sentinel() {
        let mut unset = CalibrationProfile::default();
        assert!(unset.canonicalize());
        assert_eq!(unset.disparity.kind, DisparityKind::Affine);
        assert_eq!(unset.disparity.params, (0.001, 0.0));

        let mut kinect = CalibrationProfile {
            disparity: DisparityCalib::kinect(),
            ..Default::default()
        };
        assert!(!kinect.canonicalize());
        assert_eq!(kinect.disparity, DisparityCalib::kinect());
    }

    #[test]
    fn test_affine_millimeters_to_meters() {
        let calib = DisparityCalib::millimeters();
        assert_eq!(calib.depth_meters(1500, 0.0), Some(1.5));
        assert_eq!(calib.depth_meters(0, 0.0), None);
    }

    #[test]
    fn test_kinect_disparity_saturates() {
        let calib = DisparityCalib::kinect();
        assert!(calib.depth_meters(600, 573.71).is_some());
        assert_eq!(calib.depth_meters(2047, 573.71), None);
    }
}
