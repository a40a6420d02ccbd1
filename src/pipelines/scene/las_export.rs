// SPDX-License-Identifier: GPL-3.0-only

//! LAS point cloud export

use crate::errors::{MeshError, MeshResult};
use crate::pipelines::mesh::PointCloud;
use las::{Builder, Point, Writer};
use std::path::Path;
use tracing::{debug, info};

/// Offset and scale for one axis: centered on the data, 1 mm resolution
fn axis_transform(values: impl Iterator<Item = f64>) -> las::Transform {
    let (min, max) = values.fold((f64::MAX, f64::MIN), |(min, max), v| {
        (min.min(v), max.max(v))
    });
    las::Transform {
        scale: 0.001,
        offset: (min + max) / 2.0,
    }
}

/// Write the cloud as uncompressed LAS 1.4
pub fn write_las(cloud: &PointCloud, path: &Path) -> MeshResult<()> {
    if cloud.is_empty() {
        return Err(MeshError::Export("No points to export".to_string()));
    }

    info!(
        point_count = cloud.len(),
        path = %path.display(),
        "Exporting point cloud"
    );

    let mut builder = Builder::from((1, 4));
    builder.point_format.is_compressed = false;
    builder.transforms = las::Vector {
        x: axis_transform(cloud.points.iter().map(|p| f64::from(p.x))),
        y: axis_transform(cloud.points.iter().map(|p| f64::from(p.y))),
        z: axis_transform(cloud.points.iter().map(|p| f64::from(p.z))),
    };

    let header = builder
        .into_header()
        .map_err(|e| MeshError::Export(format!("Failed to build LAS header: {}", e)))?;
    let mut writer = Writer::from_path(path, header)
        .map_err(|e| MeshError::Export(format!("Failed to create LAS writer: {}", e)))?;

    for p in &cloud.points {
        let point = Point {
            x: f64::from(p.x),
            y: f64::from(p.y),
            z: f64::from(p.z),
            ..Default::default()
        };
        writer
            .write_point(point)
            .map_err(|e| MeshError::Export(format!("Failed to write point: {}", e)))?;
    }

    writer
        .close()
        .map_err(|e| MeshError::Export(format!("Failed to close LAS file: {}", e)))?;

    debug!(path = %path.display(), "LAS export complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::mesh::Vec3;

    #[test]
    fn test_transform_is_centered() {
        let t = axis_transform([-1.0, 3.0].into_iter());
        assert_eq!(t.offset, 1.0);
        assert_eq!(t.scale, 0.001);
    }

    #[test]
    fn test_empty_cloud_rejected() {
        let path = std::env::temp_dir().join("never-written.las");
        assert!(write_las(&PointCloud::default(), &path).is_err());
    }

    #[test]
    fn test_write_small_cloud() {
        let path = std::env::temp_dir().join(format!("cloud-{}.las", uuid::Uuid::new_v4()));
        let cloud = PointCloud {
            points: vec![Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.5, -0.5, 2.0)],
        };
        write_las(&cloud, &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        std::fs::remove_file(&path).ok();
    }
}
