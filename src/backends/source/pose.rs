// SPDX-License-Identifier: GPL-3.0-only

//! External pose providers
//!
//! A pose source feeds tracked camera poses into the engine from outside
//! the engine's own tracker. The default is [`NullPoseSource`], which
//! leaves tracking to the engine.

use crate::engine::SharedEngine;

pub trait PoseSource: Send {
    fn name(&self) -> &'static str;

    /// Attach the engine that should receive poses
    fn bind_engine(&mut self, engine: SharedEngine);
}

#[derive(Debug, Default)]
pub struct NullPoseSource {
    bound: bool,
}

impl NullPoseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }
}

impl PoseSource for NullPoseSource {
    fn name(&self) -> &'static str {
        "none"
    }

    fn bind_engine(&mut self, _engine: SharedEngine) {
        self.bound = true;
    }
}
