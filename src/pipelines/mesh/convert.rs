// SPDX-License-Identifier: GPL-3.0-only

//! Triangle soup to point cloud / polygon mesh conversion
//!
//! Every triangle contributes its three vertices in order, so the point
//! cloud and the polygon mesh share the same `3 * N` points. Polygon `i`
//! references those points in reversed order: `[3i + 2, 3i + 1, 3i]`.

use super::buffer::{Triangle, Vec3};
use crate::errors::{MeshError, MeshResult};
use tracing::{debug, warn};

/// Ordered, unindexed points
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Vec3>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `[x0, y0, z0, x1, ...]`
    pub fn flatten(&self) -> Vec<f32> {
        self.points.iter().flat_map(|p| p.to_array()).collect()
    }
}

/// Indices into the owning mesh's point cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    pub vertices: Vec<u32>,
}

impl Polygon {
    pub fn new(vertices: impl Into<Vec<u32>>) -> Self {
        Self {
            vertices: vertices.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonMesh {
    pub cloud: PointCloud,
    pub polygons: Vec<Polygon>,
}

impl PolygonMesh {
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }
}

/// Triangle-only mesh handed to transports and exporters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalMesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    /// Polygons dropped for having fewer than three vertices
    pub skipped_polygons: usize,
}

fn emit_points(triangles: &[Triangle]) -> Vec<Vec3> {
    let mut points = Vec::with_capacity(triangles.len() * 3);
    for triangle in triangles {
        points.extend_from_slice(&triangle.vertices());
    }
    points
}

/// Point cloud of every triangle vertex, in engine order
pub fn to_point_cloud(triangles: &[Triangle]) -> PointCloud {
    if triangles.is_empty() {
        debug!("Point cloud requested for an empty mesh");
    }
    PointCloud {
        points: emit_points(triangles),
    }
}

/// Indexed polygon mesh; fails only if the points cannot be addressed with u32
pub fn to_polygon_mesh(triangles: &[Triangle]) -> MeshResult<PolygonMesh> {
    let point_count = triangles.len() * 3;
    if point_count > u32::MAX as usize + 1 {
        return Err(MeshError::IndexOverflow(point_count));
    }
    if triangles.is_empty() {
        warn!("Mesh has no triangles, producing an empty polygon mesh");
    }

    let polygons = (0..triangles.len() as u32)
        .map(|i| Polygon::new([3 * i + 2, 3 * i + 1, 3 * i]))
        .collect();

    Ok(PolygonMesh {
        cloud: PointCloud {
            points: emit_points(triangles),
        },
        polygons,
    })
}

/// Convert to a triangle-only mesh.
///
/// Polygons with fewer than three vertices are skipped; longer polygons
/// keep only their first three indices.
pub fn to_external_mesh(mesh: &PolygonMesh) -> ExternalMesh {
    let mut triangles = Vec::with_capacity(mesh.polygons.len());
    let mut skipped_polygons = 0;

    for (index, polygon) in mesh.polygons.iter().enumerate() {
        match polygon.vertices.as_slice() {
            [a, b, c, rest @ ..] => {
                if !rest.is_empty() {
                    debug!(
                        polygon = index,
                        vertices = polygon.vertices.len(),
                        "Truncating polygon to its first three indices"
                    );
                }
                triangles.push([*a, *b, *c]);
            }
            _ => {
                warn!(
                    polygon = index,
                    vertices = polygon.vertices.len(),
                    "Skipping polygon with fewer than three vertices"
                );
                skipped_polygons += 1;
            }
        }
    }

    ExternalMesh {
        vertices: mesh.cloud.points.clone(),
        triangles,
        skipped_polygons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_triangles(n: usize) -> Vec<Triangle> {
        (0..n)
            .map(|i| {
                let f = i as f32;
                Triangle::new(
                    Vec3::new(f, 0.0, 1.0),
                    Vec3::new(f + 1.0, 0.0, 1.0),
                    Vec3::new(f, 1.0, 1.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_polygon_winding_is_reversed() {
        let mesh = to_polygon_mesh(&grid_triangles(2)).unwrap();
        assert_eq!(mesh.cloud.len(), 6);
        assert_eq!(mesh.polygons[0].vertices, vec![2, 1, 0]);
        assert_eq!(mesh.polygons[1].vertices, vec![5, 4, 3]);
    }

    #[test]
    fn test_point_cloud_matches_mesh_points() {
        let triangles = grid_triangles(5);
        let cloud = to_point_cloud(&triangles);
        let mesh = to_polygon_mesh(&triangles).unwrap();
        assert_eq!(cloud, mesh.cloud);
        assert_eq!(cloud.flatten().len(), 45);
    }

    #[test]
    fn test_empty_input_gives_empty_mesh() {
        let mesh = to_polygon_mesh(&[]).unwrap();
        assert!(mesh.is_empty());
        assert!(mesh.cloud.is_empty());
    }

    #[test]
    fn test_external_mesh_skips_and_truncates() {
        let mesh = PolygonMesh {
            cloud: PointCloud {
                points: vec![Vec3::default(); 6],
            },
            polygons: vec![
                Polygon::new([0, 1]),
                Polygon::new([0, 1, 2, 3, 4]),
                Polygon::new([5, 4, 3]),
            ],
        };
        let external = to_external_mesh(&mesh);
        assert_eq!(external.skipped_polygons, 1);
        assert_eq!(external.triangles, vec![[0, 1, 2], [5, 4, 3]]);
        assert_eq!(external.vertices.len(), 6);
    }
}
