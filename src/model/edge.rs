//! The edge value type and its state machine.
//!
//! An [`Edge`] is either a preview line (source only, plus a free endpoint that follows the
//! pointer) or a connection (source and target ports). Storage and indexing live in the manager;
//! this module only knows about one edge at a time.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    FlowlinesError, Result,
    model::{BranchInfo, EdgeKind, EdgeState, IN_PORT, NodeId, OUT_PORT, Point, PortDirection, Rect, StateTransition},
    utils,
};

/// Unique identifier for an edge.
pub type EdgeId = String;

/// Version stamped into edge metadata.
pub const EDGE_SCHEMA_VERSION: &str = "1.0";
/// Transition history kept per edge.
const MAX_HISTORY: usize = 32;

/// One end of an edge.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub node_id: NodeId,
    pub port_id: String,
    /// Resolved world position, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
}

impl Endpoint {
    pub fn new(
        node_id: impl Into<NodeId>,
        port_id: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            port_id: port_id.into(),
            point: None,
        }
    }

    pub fn source(node_id: impl Into<NodeId>) -> Self {
        Self::new(node_id, OUT_PORT)
    }

    pub fn target(node_id: impl Into<NodeId>) -> Self {
        Self::new(node_id, IN_PORT)
    }

    pub fn at(
        mut self,
        point: Point,
    ) -> Self {
        self.point = Some(point);
        self
    }

    /// `nodeId:portId:direction`, the occupancy key of this endpoint.
    pub fn slot_key(
        &self,
        direction: PortDirection,
    ) -> String {
        format!("{}:{}:{}", self.node_id, self.port_id, direction.as_ref())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Marker {
    pub name: String,
    pub width: f64,
    pub height: f64,
}

impl Marker {
    pub fn block() -> Self {
        Self {
            name: "block".to_string(),
            width: 8.0,
            height: 8.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EdgeStyle {
    pub stroke: String,
    pub stroke_width: f64,
    pub stroke_dasharray: Option<String>,
    pub opacity: f64,
    pub target_marker: Option<Marker>,
}

pub const PREVIEW_STROKE: &str = "#1890ff";
pub const CONNECTION_STROKE: &str = "#5f95ff";

impl EdgeStyle {
    /// Dashed stroke, no arrowhead.
    pub fn preview() -> Self {
        Self {
            stroke: PREVIEW_STROKE.to_string(),
            stroke_width: 2.0,
            stroke_dasharray: Some("5,5".to_string()),
            opacity: 0.8,
            target_marker: None,
        }
    }

    /// Solid stroke, block arrowhead.
    pub fn connection() -> Self {
        Self {
            stroke: CONNECTION_STROKE.to_string(),
            stroke_width: 2.0,
            stroke_dasharray: None,
            opacity: 1.0,
            target_marker: Some(Marker::block()),
        }
    }

    pub fn for_kind(kind: EdgeKind) -> Self {
        match kind {
            EdgeKind::Connection => Self::connection(),
            EdgeKind::Preview | EdgeKind::Temporary => Self::preview(),
        }
    }
}

impl Default for EdgeStyle {
    fn default() -> Self {
        Self::preview()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RenderFlags {
    pub visible: bool,
    pub z_index: i32,
    pub interactive: bool,
    pub selectable: bool,
}

impl Default for RenderFlags {
    fn default() -> Self {
        Self {
            visible: true,
            z_index: 0,
            interactive: true,
            selectable: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EdgeMetadata {
    pub created_at: i64,
    pub updated_at: i64,
    pub created_by: String,
    pub version: String,
}

impl EdgeMetadata {
    pub fn new(created_by: impl Into<String>) -> Self {
        let now = utils::time::time_millis();
        Self {
            created_at: now,
            updated_at: now,
            created_by: created_by.into(),
            version: EDGE_SCHEMA_VERSION.to_string(),
        }
    }
}

impl Default for EdgeMetadata {
    fn default() -> Self {
        Self::new("system")
    }
}

/// A preview line or connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub kind: EdgeKind,
    pub state: EdgeState,
    pub source: Endpoint,
    /// Absent for preview lines, present for connections.
    pub target: Option<Endpoint>,
    /// Dangling end of a preview line, follows the pointer while dragging.
    #[serde(default)]
    pub free_end: Option<Point>,
    #[serde(default)]
    pub branch: Option<BranchInfo>,
    #[serde(default)]
    pub style: EdgeStyle,
    #[serde(default)]
    pub flags: RenderFlags,
    #[serde(default)]
    pub metadata: EdgeMetadata,
    #[serde(default = "default_valid")]
    pub is_valid: bool,
    #[serde(skip)]
    history: VecDeque<StateTransition>,
}

fn default_valid() -> bool {
    true
}

impl Edge {
    /// A new preview line leaving `source_node` through `out`.
    pub fn preview(
        id: impl Into<EdgeId>,
        source_node: impl Into<NodeId>,
        branch: Option<BranchInfo>,
    ) -> Self {
        Self::build(id.into(), EdgeKind::Preview, Endpoint::source(source_node), None, branch)
    }

    /// A new active connection from `source_node:out` to `target_node:in`.
    pub fn connection(
        id: impl Into<EdgeId>,
        source_node: impl Into<NodeId>,
        target_node: impl Into<NodeId>,
        branch: Option<BranchInfo>,
    ) -> Self {
        Self::build(id.into(), EdgeKind::Connection, Endpoint::source(source_node), Some(Endpoint::target(target_node)), branch)
    }

    /// A drag-in-progress visual.
    pub fn temporary(
        id: impl Into<EdgeId>,
        source_node: impl Into<NodeId>,
    ) -> Self {
        Self::build(id.into(), EdgeKind::Temporary, Endpoint::source(source_node), None, None)
    }

    fn build(
        id: EdgeId,
        kind: EdgeKind,
        source: Endpoint,
        target: Option<Endpoint>,
        branch: Option<BranchInfo>,
    ) -> Self {
        let style = restyle(EdgeStyle::for_kind(kind), branch.as_ref());
        Self {
            id,
            kind,
            state: EdgeState::initial_for(kind),
            source,
            target,
            free_end: None,
            branch,
            style,
            flags: RenderFlags::default(),
            metadata: EdgeMetadata::default(),
            is_valid: true,
            history: VecDeque::new(),
        }
    }

    pub fn created_by(
        mut self,
        creator: impl Into<String>,
    ) -> Self {
        self.metadata.created_by = creator.into();
        self
    }

    pub fn is_preview(&self) -> bool {
        self.kind == EdgeKind::Preview
    }

    pub fn is_connection(&self) -> bool {
        self.kind == EdgeKind::Connection
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.branch.as_ref().map(|b| b.id.as_str())
    }

    pub fn target_node(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.node_id.as_str())
    }

    /// `source-target-branch`, stable across conversions, used for duplicate detection.
    pub fn connection_key(&self) -> String {
        connection_key(&self.source.node_id, self.target_node(), self.branch_id())
    }

    /// Port slot keys this edge occupies.
    ///
    /// A branch is its own outgoing slot, so a multi-output node can hold one edge per branch.
    pub fn port_slots(&self) -> Vec<String> {
        let mut slots = vec![source_slot_key(&self.source.node_id, &self.source.port_id, self.branch_id())];
        if let Some(target) = &self.target {
            slots.push(target.slot_key(PortDirection::In));
        }
        slots
    }

    /// Bounding box from the source port to the target or free end.
    pub fn bounds(&self) -> Option<Rect> {
        let start = self.source.point?;
        let end = self.target.as_ref().and_then(|t| t.point).or(self.free_end)?;
        Some(Rect::spanning(start, end))
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    /// Move to `to` if the transition table allows it. An illegal transition leaves the state
    /// unchanged.
    pub fn transition_to(
        &mut self,
        to: EdgeState,
    ) -> Result<()> {
        let from = self.state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(FlowlinesError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.record(from, to);
        Ok(())
    }

    /// Turn a preview line into a connection to `target`.
    ///
    /// The state walks the legal path to `connected` and then hands off to `active`, so the
    /// recorded history only ever contains table transitions.
    pub fn convert_to_connection(
        &mut self,
        target: Endpoint,
    ) -> Result<()> {
        if self.kind != EdgeKind::Preview {
            return Err(FlowlinesError::InvalidEdge(format!("edge {} is a {}, not a preview line", self.id, self.kind)));
        }
        if target.node_id.is_empty() {
            return Err(FlowlinesError::MissingId("target node id".to_string()));
        }
        let path = self.state.path_to_connected().ok_or_else(|| FlowlinesError::IllegalTransition {
            from: self.state.to_string(),
            to: EdgeState::Active.to_string(),
        })?;
        for next in path {
            self.transition_to(*next)?;
        }
        self.transition_to(EdgeState::Active)?;
        self.kind = EdgeKind::Connection;
        self.target = Some(target);
        self.free_end = None;
        self.style = restyle(EdgeStyle::connection(), self.branch.as_ref());
        self.touch();
        self.validate();
        Ok(())
    }

    /// Turn a connection back into a preview line. Branch, flags and metadata survive, the
    /// target does not.
    pub fn convert_to_preview(&mut self) {
        self.free_end = self.target.take().and_then(|t| t.point);
        self.kind = EdgeKind::Preview;
        self.state = EdgeState::Interactive;
        self.style = restyle(EdgeStyle::preview(), self.branch.as_ref());
        self.touch();
        self.validate();
    }

    /// Recompute `is_valid` from the structural rules and return the violated ones.
    pub fn validate(&mut self) -> Vec<String> {
        let errors = self.structural_errors();
        self.is_valid = errors.is_empty();
        errors
    }

    /// Structural rule violations without touching `is_valid`.
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.id.is_empty() {
            errors.push("edge id is missing".to_string());
        }
        if self.source.node_id.is_empty() {
            errors.push("source node is missing".to_string());
        }
        match self.kind {
            EdgeKind::Connection => match &self.target {
                None => errors.push("connection requires a target".to_string()),
                Some(t) if t.node_id.is_empty() => errors.push("connection target node is missing".to_string()),
                _ => {}
            },
            EdgeKind::Preview | EdgeKind::Temporary => {
                if self.target.is_some() {
                    errors.push(format!("{} must not have a target", self.kind));
                }
            }
        }
        if !self.state.belongs_to(self.kind) {
            errors.push(format!("state {} does not apply to a {}", self.state, self.kind));
        }
        errors
    }

    /// Reapply the default style for the current kind and branch.
    pub fn reset_style(&mut self) {
        self.style = restyle(EdgeStyle::for_kind(self.kind), self.branch.as_ref());
    }

    pub fn touch(&mut self) {
        self.metadata.updated_at = utils::time::time_millis();
    }

    fn record(
        &mut self,
        from: EdgeState,
        to: EdgeState,
    ) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from,
            to,
            at: utils::time::time_millis(),
        });
        self.touch();
    }
}

fn restyle(
    mut style: EdgeStyle,
    branch: Option<&BranchInfo>,
) -> EdgeStyle {
    if let Some(color) = branch.and_then(|b| b.color.clone()) {
        style.stroke = color;
    }
    style
}

pub fn connection_key(
    source: &str,
    target: Option<&str>,
    branch: Option<&str>,
) -> String {
    format!("{}-{}-{}", source, target.unwrap_or("unknown"), branch.unwrap_or("default"))
}

/// Outgoing slot key: `node:port:out`, or `node:port/branch:out` for a branch.
pub fn source_slot_key(
    node_id: &str,
    port_id: &str,
    branch: Option<&str>,
) -> String {
    match branch {
        Some(b) => format!("{}:{}/{}:{}", node_id, port_id, b, PortDirection::Out.as_ref()),
        None => format!("{}:{}:{}", node_id, port_id, PortDirection::Out.as_ref()),
    }
}

/// Incoming slot key: `node:port:in`.
pub fn target_slot_key(
    node_id: &str,
    port_id: &str,
) -> String {
    format!("{}:{}:{}", node_id, port_id, PortDirection::In.as_ref())
}
