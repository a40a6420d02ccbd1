// SPDX-License-Identifier: GPL-3.0-only

//! Geometry pipelines
//!
//! - [`mesh`]: host materialization of the engine's triangle buffer and
//!   conversion to point clouds and polygon meshes
//! - [`scene`]: STL, OBJ and LAS export

pub mod mesh;
pub mod scene;
