use serde::Serialize;

use crate::{
    gatekeeper::CreationMethod,
    manager::{CleanupReport, DiagnosisReport},
    model::{Edge, EdgeId, NodeId},
};

/// Why an edge left the collection.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemovalReason {
    Requested,
    NodeRemoved,
    Cleanup,
    Replaced,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EdgeEvent {
    ManagerInitialized {
        adopted: usize,
        skipped: usize,
    },
    PreviewCreated {
        edge: Edge,
    },
    ConnectionCreated {
        method: CreationMethod,
        edge: Edge,
    },
    PreviewConverted {
        preview_line_id: EdgeId,
        edge: Edge,
    },
    EdgeRemoved {
        reason: RemovalReason,
        edge: Edge,
    },
    PreviewRestored {
        source_node_id: NodeId,
        removed_connection_id: EdgeId,
        edge: Edge,
    },
    CleanupCompleted {
        report: CleanupReport,
    },
    DiagnosisProblemsFound {
        report: DiagnosisReport,
    },
    PerformanceWarning {
        operation: String,
        elapsed_ms: f64,
        threshold_ms: f64,
    },
}

impl EdgeEvent {
    /// The `scope:action` name handlers subscribe to.
    pub fn name(&self) -> &'static str {
        match self {
            EdgeEvent::ManagerInitialized {
                ..
            } => "manager:initialized",
            EdgeEvent::PreviewCreated {
                ..
            } => "preview:created",
            EdgeEvent::ConnectionCreated {
                ..
            } => "connection:created",
            EdgeEvent::PreviewConverted {
                ..
            } => "preview:converted",
            EdgeEvent::EdgeRemoved {
                ..
            } => "edge:removed",
            EdgeEvent::PreviewRestored {
                ..
            } => "preview:restored",
            EdgeEvent::CleanupCompleted {
                ..
            } => "cleanup:completed",
            EdgeEvent::DiagnosisProblemsFound {
                ..
            } => "diagnosis:problems_found",
            EdgeEvent::PerformanceWarning {
                ..
            } => "performance:warning",
        }
    }

    /// The edge the event is about, if any.
    pub fn edge(&self) -> Option<&Edge> {
        match self {
            EdgeEvent::PreviewCreated {
                edge,
            }
            | EdgeEvent::ConnectionCreated {
                edge, ..
            }
            | EdgeEvent::PreviewConverted {
                edge, ..
            }
            | EdgeEvent::EdgeRemoved {
                edge, ..
            }
            | EdgeEvent::PreviewRestored {
                edge, ..
            } => Some(edge),
            _ => None,
        }
    }
}
