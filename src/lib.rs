// SPDX-License-Identifier: GPL-3.0-only

//! fusion-node - control node for live RGB-D reconstruction
//!
//! The node picks one input stream (recorded frames, a live depth camera,
//! or frames bridged over a transport), drives a reconstruction engine
//! through a start/stop lifecycle, and turns the engine's triangle buffer
//! into point clouds and indexed meshes for export and publishing.
//!
//! # Architecture
//!
//! - [`backends`]: input sources and source resolution
//! - [`engine`]: reconstruction engine contract and the built-in depth-grid engine
//! - [`pipelines`]: mesh materialization, conversion and file export
//! - [`transport`]: publish/subscribe messaging
//! - [`node`]: lifecycle state machine, run session and control service
//! - [`calibration`], [`config`], [`constants`], [`errors`]

pub mod backends;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod node;
pub mod pipelines;
pub mod transport;

// Re-export commonly used types
pub use calibration::CalibrationProfile;
pub use config::NodeConfig;
pub use errors::{NodeError, NodeResult};
pub use node::{LifecycleState, ReconstructionNode};
