// SPDX-License-Identifier: GPL-3.0-only

//! Binary STL export
//!
//! 80-byte header, little-endian triangle count, then 50 bytes per
//! triangle: a normal (written as zero), three vertices, and a zero
//! attribute word. Vertices keep the engine's order.

use crate::errors::MeshResult;
use crate::pipelines::mesh::Triangle;
use std::io::Write;

const HEADER: &[u8] = b"fusion-node binary STL";

pub fn write_stl_to<W: Write>(triangles: &[Triangle], out: &mut W) -> MeshResult<()> {
    let mut header = [0u8; 80];
    header[..HEADER.len()].copy_from_slice(HEADER);
    out.write_all(&header)?;
    out.write_all(&(triangles.len() as u32).to_le_bytes())?;

    for triangle in triangles {
        out.write_all(bytemuck::bytes_of(&[0.0f32; 3]))?;
        for v in triangle.vertices() {
            for c in v.to_array() {
                out.write_all(&c.to_le_bytes())?;
            }
        }
        out.write_all(&[0u8; 2])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::mesh::Vec3;

    #[test]
    fn test_layout() {
        let tri = Triangle::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(4.0, 5.0, 6.0),
            Vec3::new(7.0, 8.0, 9.0),
        );
        let mut bytes = Vec::new();
        write_stl_to(&[tri, tri], &mut bytes).unwrap();

        assert_eq!(bytes.len(), 84 + 2 * 50);
        assert_eq!(u32::from_le_bytes(bytes[80..84].try_into().unwrap()), 2);
        // first vertex follows the 12-byte normal
        assert_eq!(f32::from_le_bytes(bytes[96..100].try_into().unwrap()), 1.0);
    }
}
