// SPDX-License-Identifier: GPL-3.0-only

//! Mesh extraction and format conversion
//!
//! Takes the engine's triangle buffer to host memory and reshapes it into
//! the point-cloud and polygon-mesh forms consumed by exporters and
//! transports.

pub mod buffer;
pub mod convert;

pub use buffer::{
    AcceleratorTriangles, HostMesh, MeshBuffer, Residency, StagedDeviceBuffer, Triangle, Vec3,
};
pub use convert::{
    ExternalMesh, PointCloud, Polygon, PolygonMesh, to_external_mesh, to_point_cloud,
    to_polygon_mesh,
};
