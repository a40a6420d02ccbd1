// SPDX-License-Identifier: GPL-3.0-only

//! Input backends
//!
//! - [`source`]: recorded and live RGB-D sources, and the resolver that
//!   picks one of them

pub mod source;
