// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the reconstruction node
//!
//! Data-level problems inside the mesh pipeline (empty meshes, malformed
//! polygons) are reported through `tracing` and never reach these types.
//! What lands here is surfaced to the control-surface caller.

use std::fmt;

/// Result type alias using NodeError
pub type NodeResult<T> = Result<T, NodeError>;

/// Result type alias for input source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type alias for reconstruction engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for mesh pipeline operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Top-level error returned by the control surface
#[derive(Debug, Clone)]
pub enum NodeError {
    /// Input source errors (including resolution failure)
    Source(SourceError),
    /// Reconstruction engine errors
    Engine(EngineError),
    /// Mesh extraction/export errors
    Mesh(MeshError),
    /// Transport errors
    Transport(TransportError),
    /// A start request arrived while a session is already active
    AlreadyRunning,
    /// Publish requested before any reconstruction engine exists
    NoActiveReconstruction,
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Worker task failure or a reply that does not match its request
    Internal(String),
}

/// Input source errors
#[derive(Debug, Clone)]
pub enum SourceError {
    /// No candidate produced a usable input stream
    NoSourceFound,
    /// Device could not be opened or queried
    DeviceUnavailable(String),
    /// A frame could not be read or decoded
    FrameRead(String),
    /// A frame did not match the size the source advertised
    FrameSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Calibration file could not be parsed
    Calibration(String),
    /// IMU data could not be read
    Imu(String),
}

/// Reconstruction engine errors
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Engine could not be constructed for the given sizes/settings
    ConstructionFailed(String),
    /// Frame integration failed
    Processing(String),
    /// Meshing step failed
    Meshing(String),
}

/// Mesh pipeline errors
#[derive(Debug, Clone)]
pub enum MeshError {
    /// `valid_count` exceeded `capacity`
    CountExceedsCapacity { valid_count: usize, capacity: usize },
    /// Host scratch buffer could not be allocated
    HostAllocation(String),
    /// Copy from accelerator memory failed
    DeviceCopy(String),
    /// Too many vertices to address with 32-bit indices
    IndexOverflow(usize),
    /// File export failed
    Export(String),
}

/// Transport errors
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Topic name was empty or malformed
    InvalidTopic(String),
    /// Message could not be delivered
    PublishFailed(String),
    /// Subscription could not be created
    SubscribeFailed(String),
    /// Control server is gone
    ServiceUnavailable,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Source(e) => write!(f, "Source error: {}", e),
            NodeError::Engine(e) => write!(f, "Engine error: {}", e),
            NodeError::Mesh(e) => write!(f, "Mesh error: {}", e),
            NodeError::Transport(e) => write!(f, "Transport error: {}", e),
            NodeError::AlreadyRunning => write!(f, "A reconstruction session is already active"),
            NodeError::NoActiveReconstruction => write!(f, "No active reconstruction"),
            NodeError::Config(msg) => write!(f, "Configuration error: {}", msg),
            NodeError::Storage(msg) => write!(f, "Storage error: {}", msg),
            NodeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NoSourceFound => write!(f, "Failed to open any image stream"),
            SourceError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            SourceError::FrameRead(msg) => write!(f, "Frame read failed: {}", msg),
            SourceError::FrameSizeMismatch { expected, actual } => write!(
                f,
                "Frame size mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            SourceError::Calibration(msg) => write!(f, "Calibration error: {}", msg),
            SourceError::Imu(msg) => write!(f, "IMU error: {}", msg),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ConstructionFailed(msg) => write!(f, "Construction failed: {}", msg),
            EngineError::Processing(msg) => write!(f, "Frame processing failed: {}", msg),
            EngineError::Meshing(msg) => write!(f, "Meshing failed: {}", msg),
        }
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::CountExceedsCapacity {
                valid_count,
                capacity,
            } => write!(
                f,
                "Triangle count {} exceeds buffer capacity {}",
                valid_count, capacity
            ),
            MeshError::HostAllocation(msg) => write!(f, "Host allocation failed: {}", msg),
            MeshError::DeviceCopy(msg) => write!(f, "Device copy failed: {}", msg),
            MeshError::IndexOverflow(n) => {
                write!(f, "{} vertices cannot be addressed with 32-bit indices", n)
            }
            MeshError::Export(msg) => write!(f, "Export failed: {}", msg),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidTopic(topic) => write!(f, "Invalid topic: '{}'", topic),
            TransportError::PublishFailed(msg) => write!(f, "Publish failed: {}", msg),
            TransportError::SubscribeFailed(msg) => write!(f, "Subscribe failed: {}", msg),
            TransportError::ServiceUnavailable => write!(f, "Control service unavailable"),
        }
    }
}

impl std::error::Error for NodeError {}
impl std::error::Error for SourceError {}
impl std::error::Error for EngineError {}
impl std::error::Error for MeshError {}
impl std::error::Error for TransportError {}

// Conversions from sub-errors to NodeError
impl From<SourceError> for NodeError {
    fn from(err: SourceError) -> Self {
        NodeError::Source(err)
    }
}

impl From<EngineError> for NodeError {
    fn from(err: EngineError) -> Self {
        NodeError::Engine(err)
    }
}

impl From<MeshError> for NodeError {
    fn from(err: MeshError) -> Self {
        NodeError::Mesh(err)
    }
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        NodeError::Transport(err)
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        MeshError::Export(err.to_string())
    }
}

impl From<image::ImageError> for SourceError {
    fn from(err: image::ImageError) -> Self {
        SourceError::FrameRead(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_failure_message() {
        let err: NodeError = SourceError::NoSourceFound.into();
        assert_eq!(
            err.to_string(),
            "Source error: Failed to open any image stream"
        );
    }

    #[test]
    fn test_capacity_message_names_both_counts() {
        let err = MeshError::CountExceedsCapacity {
            valid_count: 12,
            capacity: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("10"));
    }
}
