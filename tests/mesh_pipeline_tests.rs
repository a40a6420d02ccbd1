// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for mesh extraction and conversion

use fusion_node::errors::MeshError;
use fusion_node::pipelines::mesh::{
    AcceleratorTriangles, MeshBuffer, Polygon, PolygonMesh, Residency, Triangle, Vec3,
    to_external_mesh, to_point_cloud, to_polygon_mesh,
};
use std::collections::HashSet;

fn triangle(i: usize) -> Triangle {
    let f = i as f32;
    Triangle::new(
        Vec3::new(f, 0.0, 1.0),
        Vec3::new(f, 1.0, 1.0),
        Vec3::new(f, 2.0, 1.0),
    )
}

fn triangles(n: usize) -> Vec<Triangle> {
    (0..n).map(triangle).collect()
}

/// Device memory stand-in that hands out a fixed triangle list
struct FakeDevice {
    triangles: Vec<Triangle>,
}

impl AcceleratorTriangles for FakeDevice {
    fn copy_to_host(&self, dst: &mut [Triangle]) -> Result<(), MeshError> {
        dst.copy_from_slice(&self.triangles[..dst.len()]);
        Ok(())
    }
}

#[test]
fn test_polygon_mesh_shape() {
    let n = 7;
    let mesh = to_polygon_mesh(&triangles(n)).unwrap();

    assert_eq!(mesh.cloud.len(), 3 * n);
    assert_eq!(mesh.polygons.len(), n);
    for polygon in &mesh.polygons {
        let distinct: HashSet<u32> = polygon.vertices.iter().copied().collect();
        assert_eq!(distinct.len(), 3);
        assert!(polygon.vertices.iter().all(|&v| (v as usize) < 3 * n));
    }
}

#[test]
fn test_polygon_winding_is_reversed() {
    let mesh = to_polygon_mesh(&triangles(4)).unwrap();
    for (i, polygon) in mesh.polygons.iter().enumerate() {
        let i = i as u32;
        assert_eq!(polygon.vertices, vec![3 * i + 2, 3 * i + 1, 3 * i]);
    }
}

#[test]
fn test_point_cloud_matches_polygon_mesh_points() {
    let tris = triangles(5);
    assert_eq!(to_point_cloud(&tris), to_polygon_mesh(&tris).unwrap().cloud);
}

#[test]
fn test_host_materialize_does_not_copy() {
    let buffer = MeshBuffer::from_host(triangles(3), 8, 3).unwrap();
    let host = buffer.materialize().unwrap();

    assert_eq!(buffer.residency(), Residency::Host);
    assert!(host.is_borrowed());
    assert_eq!(host.triangles(), triangles(3).as_slice());
}

#[test]
fn test_only_valid_prefix_is_converted() {
    let buffer = MeshBuffer::from_host(triangles(10), 10, 2).unwrap();
    let host = buffer.materialize().unwrap();
    let mesh = to_polygon_mesh(host.triangles()).unwrap();

    assert_eq!(mesh.cloud.len(), 6);
    assert_eq!(
        mesh.polygons,
        vec![Polygon::new([2, 1, 0]), Polygon::new([5, 4, 3])]
    );
}

#[test]
fn test_accelerator_materialize_copies_valid_triangles() {
    let device = FakeDevice {
        triangles: triangles(6),
    };
    let buffer = MeshBuffer::on_accelerator(Box::new(device), 6, 4).unwrap();
    let host = buffer.materialize().unwrap();

    assert_eq!(buffer.residency(), Residency::Accelerator);
    assert!(!host.is_borrowed());
    assert_eq!(host.triangles(), triangles(4).as_slice());
}

#[test]
fn test_count_above_capacity_rejected() {
    assert!(matches!(
        MeshBuffer::from_host(triangles(4), 2, 3),
        Err(MeshError::CountExceedsCapacity { .. })
    ));
}

#[test]
fn test_empty_mesh_is_not_an_error() {
    let buffer = MeshBuffer::host(16);
    let host = buffer.materialize().unwrap();
    let mesh = to_polygon_mesh(host.triangles()).unwrap();

    assert!(mesh.is_empty());
    assert!(mesh.cloud.is_empty());
}

#[test]
fn test_external_mesh_skips_and_truncates() {
    let mesh = PolygonMesh {
        cloud: to_point_cloud(&triangles(2)),
        polygons: vec![
            Polygon::new([0, 1]),
            Polygon::new([0, 1, 2, 3, 4]),
            Polygon::new([5, 4, 3]),
        ],
    };
    let external = to_external_mesh(&mesh);

    assert_eq!(external.vertices, mesh.cloud.points);
    assert_eq!(external.triangles, vec![[0, 1, 2], [5, 4, 3]]);
    assert_eq!(external.skipped_polygons, 1);
}
