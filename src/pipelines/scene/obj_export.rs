// SPDX-License-Identifier: GPL-3.0-only

//! Wavefront OBJ export

use crate::errors::MeshResult;
use crate::pipelines::mesh::PolygonMesh;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Vertices, then one `f` line per polygon with 1-based indices
pub fn write_obj_to<W: Write>(mesh: &PolygonMesh, out: &mut W) -> MeshResult<()> {
    for p in &mesh.cloud.points {
        writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
    }
    for polygon in &mesh.polygons {
        write!(out, "f")?;
        for index in &polygon.vertices {
            write!(out, " {}", u64::from(*index) + 1)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_obj(mesh: &PolygonMesh, path: &Path) -> MeshResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_obj_to(mesh, &mut out)?;
    out.flush()?;
    debug!(
        path = %path.display(),
        vertices = mesh.cloud.len(),
        faces = mesh.polygons.len(),
        "OBJ written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::mesh::{Triangle, Vec3, to_polygon_mesh};

    #[test]
    fn test_faces_are_one_based_and_reversed() {
        let tri = Triangle::new(
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        let mesh = to_polygon_mesh(&[tri]).unwrap();
        let mut bytes = Vec::new();
        write_obj_to(&mesh, &mut bytes).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 3);
        assert_eq!(text.lines().last(), Some("f 3 2 1"));
    }
}
