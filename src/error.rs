//! Error types for Flowlines.
//!
//! Only programmer-error conditions are represented here: missing identifiers, unknown edges,
//! malformed port names and an absent rendering surface. Expected, user-facing rejections
//! (duplicates, occupied ports, limits) travel as values, see [`PolicyViolation`].

use std::io::ErrorKind;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Flowlines operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum FlowlinesError {
    /// A required identifier was empty or absent.
    #[error("missing {0}")]
    MissingId(String),

    /// No edge with the given id is registered.
    #[error("edge {0} not found")]
    EdgeNotFound(String),

    /// The node does not exist on the rendering surface.
    #[error("node {0} not found")]
    NodeNotFound(String),

    /// A caller supplied a port other than `out` (source) or `in` (target) in strict mode.
    #[error("port mismatch: {role} port must be '{expected}', got '{port}'")]
    PortMismatch {
        role: String,
        expected: String,
        port: String,
    },

    /// The state machine refused a transition.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: String,
        to: String,
    },

    /// The edge value violates a structural rule.
    #[error("{0}")]
    InvalidEdge(String),

    /// A coordinate or extent is NaN, infinite or negative.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The manager was used before a rendering surface was attached.
    #[error("rendering surface is not initialized")]
    SurfaceUnavailable,

    /// The rendering surface reported a failure.
    #[error("{0}")]
    Surface(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML, external edge shapes).
    #[error("{0}")]
    Convert(String),

    /// Notification queue errors.
    #[error("{0}")]
    Queue(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl From<FlowlinesError> for String {
    fn from(val: FlowlinesError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for FlowlinesError {
    fn from(error: std::io::Error) -> Self {
        FlowlinesError::IoError(error.to_string())
    }
}

impl From<FlowlinesError> for std::io::Error {
    fn from(val: FlowlinesError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<serde_json::Error> for FlowlinesError {
    fn from(error: serde_json::Error) -> Self {
        FlowlinesError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for FlowlinesError {
    fn from(error: toml::de::Error) -> Self {
        FlowlinesError::Config(error.to_string())
    }
}

impl From<globset::Error> for FlowlinesError {
    fn from(error: globset::Error) -> Self {
        FlowlinesError::Config(format!("invalid event pattern: {}", error))
    }
}

/// Expected, recoverable rejections reported to the user instead of thrown.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PolicyViolation {
    #[error("direct connection creation is disabled; convert a preview line instead")]
    DirectCreationBlocked,

    #[error("connection {key} already exists")]
    DuplicateConnection {
        key: String,
    },

    #[error("port {slot} is already occupied by edge {edge_id}")]
    PortOccupied {
        slot: String,
        edge_id: String,
    },

    #[error("node {node_id} cannot connect to itself")]
    SelfLoop {
        node_id: String,
    },

    #[error("node {node_id} has reached the connection limit of {limit}")]
    ConnectionLimit {
        node_id: String,
        limit: usize,
    },

    #[error("node {node_id} does not exist")]
    MissingNode {
        node_id: String,
    },

    #[error("preview line {edge_id} does not exist")]
    MissingPreview {
        edge_id: String,
    },

    #[error("edge {edge_id} is not a preview line")]
    NotAPreview {
        edge_id: String,
    },

    #[error("incompatible ports: {reason}")]
    PortIncompatible {
        reason: String,
    },

    #[error("preview line already exists for {key}")]
    PreviewExists {
        key: String,
    },

    #[error("edge limit of {limit} reached")]
    CapacityReached {
        limit: usize,
    },

    #[error("{message}")]
    Custom {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_mismatch_message() {
        let err = FlowlinesError::PortMismatch {
            role: "source".to_string(),
            expected: "out".to_string(),
            port: "left".to_string(),
        };
        assert_eq!(err.to_string(), "port mismatch: source port must be 'out', got 'left'");
    }

    #[test]
    fn test_io_error_roundtrip_message() {
        let err: std::io::Error = FlowlinesError::SurfaceUnavailable.into();
        assert_eq!(err.to_string(), "rendering surface is not initialized");
    }

    #[test]
    fn test_policy_violation_serializes_with_kind_tag() {
        let v = PolicyViolation::SelfLoop {
            node_id: "n1".to_string(),
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "self_loop");
        assert_eq!(json["node_id"], "n1");
    }
}
