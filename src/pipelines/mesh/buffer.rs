// SPDX-License-Identifier: GPL-3.0-only

//! Triangle buffers written by the reconstruction engine
//!
//! A [`MeshBuffer`] either lives in host memory or behind an accelerator
//! handle. [`MeshBuffer::materialize`] is the only way to iterate it on the
//! host: host buffers are borrowed as-is, accelerator buffers are copied
//! into a scratch allocation owned by the returned [`HostMesh`].

use crate::errors::{MeshError, MeshResult};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use tracing::debug;

/// 3-D position in meters
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Three independent vertices, in the order the engine emitted them
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Triangle {
    pub p0: Vec3,
    pub p1: Vec3,
    pub p2: Vec3,
}

impl Triangle {
    pub const fn new(p0: Vec3, p1: Vec3, p2: Vec3) -> Self {
        Self { p0, p1, p2 }
    }

    pub fn vertices(&self) -> [Vec3; 3] {
        [self.p0, self.p1, self.p2]
    }
}

/// Where the triangle storage lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Host,
    Accelerator,
}

/// Triangle storage the host cannot read directly
pub trait AcceleratorTriangles: Send {
    /// Synchronously copy the first `dst.len()` triangles into `dst`
    fn copy_to_host(&self, dst: &mut [Triangle]) -> MeshResult<()>;
}

/// Device memory modeled as a flat staging region of raw bytes
///
/// Stands in for a mapped accelerator buffer: the bytes use the same
/// `#[repr(C)]` layout the engine's kernels write.
#[derive(Debug, Clone, Default)]
pub struct StagedDeviceBuffer {
    bytes: Vec<u8>,
}

impl StagedDeviceBuffer {
    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        Self {
            bytes: bytemuck::cast_slice(triangles).to_vec(),
        }
    }

    pub fn triangle_len(&self) -> usize {
        self.bytes.len() / std::mem::size_of::<Triangle>()
    }
}

impl AcceleratorTriangles for StagedDeviceBuffer {
    fn copy_to_host(&self, dst: &mut [Triangle]) -> MeshResult<()> {
        let wanted = std::mem::size_of_val(dst);
        let src = self.bytes.get(..wanted).ok_or_else(|| {
            MeshError::DeviceCopy(format!(
                "requested {} triangles, device holds {}",
                dst.len(),
                self.triangle_len()
            ))
        })?;
        bytemuck::cast_slice_mut::<Triangle, u8>(dst).copy_from_slice(src);
        Ok(())
    }
}

enum Storage {
    Host(Vec<Triangle>),
    Accelerator(Box<dyn AcceleratorTriangles>),
}

/// Flat triangle soup with a fixed capacity and a count of valid entries
pub struct MeshBuffer {
    capacity: usize,
    valid_count: usize,
    storage: Storage,
}

impl std::fmt::Debug for MeshBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshBuffer")
            .field("capacity", &self.capacity)
            .field("valid_count", &self.valid_count)
            .field("residency", &self.residency())
            .finish()
    }
}

impl MeshBuffer {
    /// Empty host-resident buffer
    pub fn host(capacity: usize) -> Self {
        Self {
            capacity,
            valid_count: 0,
            storage: Storage::Host(Vec::new()),
        }
    }

    /// Host-resident buffer whose first `valid_count` entries are meaningful
    pub fn from_host(
        triangles: Vec<Triangle>,
        capacity: usize,
        valid_count: usize,
    ) -> MeshResult<Self> {
        check_count(valid_count, capacity)?;
        if valid_count > triangles.len() {
            return Err(MeshError::CountExceedsCapacity {
                valid_count,
                capacity: triangles.len(),
            });
        }
        Ok(Self {
            capacity,
            valid_count,
            storage: Storage::Host(triangles),
        })
    }

    /// Accelerator-resident buffer
    pub fn on_accelerator(
        device: Box<dyn AcceleratorTriangles>,
        capacity: usize,
        valid_count: usize,
    ) -> MeshResult<Self> {
        check_count(valid_count, capacity)?;
        Ok(Self {
            capacity,
            valid_count,
            storage: Storage::Accelerator(device),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn is_empty(&self) -> bool {
        self.valid_count == 0
    }

    pub fn residency(&self) -> Residency {
        match self.storage {
            Storage::Host(_) => Residency::Host,
            Storage::Accelerator(_) => Residency::Accelerator,
        }
    }

    /// Replace the host contents, truncating to capacity.
    ///
    /// Returns the number of triangles dropped by the truncation.
    pub fn replace_host(&mut self, mut triangles: Vec<Triangle>) -> usize {
        let dropped = triangles.len().saturating_sub(self.capacity);
        triangles.truncate(self.capacity);
        self.valid_count = triangles.len();
        self.storage = Storage::Host(triangles);
        dropped
    }

    /// Host-readable view of the valid triangles
    pub fn materialize(&self) -> MeshResult<HostMesh<'_>> {
        check_count(self.valid_count, self.capacity)?;
        match &self.storage {
            Storage::Host(triangles) => Ok(HostMesh {
                triangles: Cow::Borrowed(&triangles[..self.valid_count]),
            }),
            Storage::Accelerator(device) => {
                let mut scratch: Vec<Triangle> = Vec::new();
                scratch
                    .try_reserve_exact(self.capacity)
                    .map_err(|e| MeshError::HostAllocation(e.to_string()))?;
                scratch.resize(self.valid_count, Triangle::zeroed());
                device.copy_to_host(&mut scratch)?;
                debug!(
                    triangles = self.valid_count,
                    capacity = self.capacity,
                    "Copied mesh from accelerator"
                );
                Ok(HostMesh {
                    triangles: Cow::Owned(scratch),
                })
            }
        }
    }
}

fn check_count(valid_count: usize, capacity: usize) -> MeshResult<()> {
    if valid_count > capacity {
        Err(MeshError::CountExceedsCapacity {
            valid_count,
            capacity,
        })
    } else {
        Ok(())
    }
}

/// Host-side triangles; owns its scratch copy when the source was on an accelerator
#[derive(Debug)]
pub struct HostMesh<'a> {
    triangles: Cow<'a, [Triangle]>,
}

impl HostMesh<'_> {
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// True when no copy was made
    pub fn is_borrowed(&self) -> bool {
        matches!(self.triangles, Cow::Borrowed(_))
    }
}
