// SPDX-License-Identifier: GPL-3.0-only

//! Scene export
//!
//! Writes one publish worth of geometry to disk:
//! - `mesh_<ts>.stl`: binary STL in engine vertex order
//! - `mesh_<ts>.obj`: vertices and faces of the polygon mesh
//! - `cloud_<ts>.las`: the point cloud (optional)

mod las_export;
mod obj_export;
mod stl_export;

pub use las_export::write_las;
pub use obj_export::{write_obj, write_obj_to};
pub use stl_export::write_stl_to;

use crate::constants::output::{MAX_STEM_SUFFIX, TIMESTAMP_FORMAT};
use crate::errors::{MeshError, MeshResult};
use crate::pipelines::mesh::{PolygonMesh, Triangle};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where and what to export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneExport {
    pub output_dir: PathBuf,
    /// Also write the point cloud as LAS
    pub include_las: bool,
}

/// Paths written by one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub stl: PathBuf,
    pub obj: PathBuf,
    /// `None` when LAS was not requested or the cloud was empty
    pub las: Option<PathBuf>,
}

fn file_stem_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn ensure_dir(dir: &Path) -> MeshResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        MeshError::Export(format!(
            "Failed to create output directory {}: {}",
            dir.display(),
            e
        ))
    })
}

/// Pick a stem no other export has used by creating its STL file exclusively.
///
/// Exports within the same millisecond get `_1`, `_2`, ... suffixes.
fn claim_stem(dir: &Path, timestamp: &str) -> MeshResult<(String, PathBuf, File)> {
    for suffix in 0..=MAX_STEM_SUFFIX {
        let stem = match suffix {
            0 => timestamp.to_string(),
            n => format!("{}_{}", timestamp, n),
        };
        let path = dir.join(format!("mesh_{}.stl", stem));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((stem, path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Export stem taken, trying next suffix");
            }
            Err(e) => {
                return Err(MeshError::Export(format!(
                    "Failed to create {}: {}",
                    path.display(),
                    e
                )));
            }
        }
    }
    Err(MeshError::Export(format!(
        "No free export name for {} in {}",
        timestamp,
        dir.display()
    )))
}

/// Export on the calling thread
pub fn export_scene_sync(
    triangles: &[Triangle],
    mesh: &PolygonMesh,
    options: &SceneExport,
) -> MeshResult<ExportedFiles> {
    ensure_dir(&options.output_dir)?;
    let (stem, stl, file) = claim_stem(&options.output_dir, &file_stem_timestamp())?;

    let mut out = BufWriter::new(file);
    write_stl_to(triangles, &mut out)?;
    out.flush()?;

    let obj = options.output_dir.join(format!("mesh_{}.obj", stem));
    write_obj(mesh, &obj)?;

    let las = if !options.include_las {
        None
    } else if mesh.cloud.is_empty() {
        warn!("Point cloud is empty, skipping LAS export");
        None
    } else {
        let path = options.output_dir.join(format!("cloud_{}.las", stem));
        write_las(&mesh.cloud, &path)?;
        Some(path)
    };

    info!(
        stl = %stl.display(),
        obj = %obj.display(),
        las = ?las,
        "Scene exported"
    );
    Ok(ExportedFiles { stl, obj, las })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::mesh::{Vec3, to_polygon_mesh};

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("fusion-node-export-{}", uuid::Uuid::new_v4()))
    }

    fn one_triangle() -> Vec<Triangle> {
        vec![Triangle::new(
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        )]
    }

    #[test]
    fn test_sync_export_creates_dir_and_files() {
        let dir = scratch_dir();
        let triangles = one_triangle();
        let mesh = to_polygon_mesh(&triangles).unwrap();
        let options = SceneExport {
            output_dir: dir.clone(),
            include_las: false,
        };

        let files = export_scene_sync(&triangles, &mesh, &options).unwrap();
        assert!(files.stl.exists());
        assert!(files.obj.exists());
        assert!(files.las.is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_cloud_skips_las() {
        let dir = scratch_dir();
        let mesh = to_polygon_mesh(&[]).unwrap();
        let options = SceneExport {
            output_dir: dir.clone(),
            include_las: true,
        };

        let files = export_scene_sync(&[], &mesh, &options).unwrap();
        assert!(files.las.is_none());
        assert_eq!(std::fs::metadata(&files.stl).unwrap().len(), 84);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_taken_stem_gets_suffix() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let ts = "20261018_120000.000";

        let (first, _, _) = claim_stem(&dir, ts).unwrap();
        let (second, path, _) = claim_stem(&dir, ts).unwrap();
        std::fs::write(dir.join(format!("mesh_{}_2.stl", ts)), b"keep").unwrap();
        let (third, _, _) = claim_stem(&dir, ts).unwrap();

        assert_eq!(first, ts);
        assert_eq!(second, format!("{}_1", ts));
        assert_eq!(path, dir.join(format!("mesh_{}_1.stl", ts)));
        assert_eq!(third, format!("{}_3", ts));
        assert_eq!(
            std::fs::read(dir.join(format!("mesh_{}_2.stl", ts))).unwrap(),
            b"keep"
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_back_to_back_exports_do_not_overwrite() {
        let dir = scratch_dir();
        let triangles = one_triangle();
        let mesh = to_polygon_mesh(&triangles).unwrap();
        let options = SceneExport {
            output_dir: dir.clone(),
            include_las: true,
        };

        let first = export_scene_sync(&triangles, &mesh, &options).unwrap();
        let second = export_scene_sync(&[], &to_polygon_mesh(&[]).unwrap(), &options).unwrap();

        assert_ne!(first.stl, second.stl);
        assert_ne!(first.obj, second.obj);
        assert!(first.las.is_some_and(|p| p.exists()));
        assert_eq!(std::fs::metadata(&first.stl).unwrap().len(), 84 + 50);
        assert_eq!(std::fs::metadata(&second.stl).unwrap().len(), 84);
        std::fs::remove_dir_all(&dir).ok();
    }
}
