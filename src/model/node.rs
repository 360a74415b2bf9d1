use serde::{Deserialize, Serialize};

use crate::model::{Point, Rect, Size};

/// node id
pub type NodeId = String;

/// Canonical source port.
pub const OUT_PORT: &str = "out";
/// Canonical target port.
pub const IN_PORT: &str = "in";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PortDirection {
    #[default]
    Out,
    In,
}

/// A named anchor point on a node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub id: String,
    pub group: PortDirection,
}

impl PortInfo {
    pub fn out() -> Self {
        Self {
            id: OUT_PORT.to_string(),
            group: PortDirection::Out,
        }
    }

    pub fn input() -> Self {
        Self {
            id: IN_PORT.to_string(),
            group: PortDirection::In,
        }
    }
}

/// One named outgoing path of a multi-output node.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BranchInfo {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub ordinal: usize,
    #[serde(default)]
    pub color: Option<String>,
}

impl BranchInfo {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        ordinal: usize,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ordinal,
            color: None,
        }
    }

    pub fn with_color(
        mut self,
        color: impl Into<String>,
    ) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// A node as the rendering surface reports it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    /// Node type tag from the task definition, e.g. `audience-split`.
    #[serde(default)]
    pub node_type: String,
    pub position: Point,
    pub size: Size,
    #[serde(default = "default_ports")]
    pub ports: Vec<PortInfo>,
    /// Outgoing branches; empty for single-output nodes.
    #[serde(default)]
    pub branches: Vec<BranchInfo>,
    /// Whether the user finished configuring the node.
    #[serde(default)]
    pub configured: bool,
}

fn default_ports() -> Vec<PortInfo> {
    vec![PortInfo::input(), PortInfo::out()]
}

impl NodeInfo {
    /// A configured node with the canonical `in` and `out` ports.
    pub fn new(
        id: impl Into<NodeId>,
        position: Point,
        size: Size,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: String::new(),
            position,
            size,
            ports: default_ports(),
            branches: Vec::new(),
            configured: true,
        }
    }

    pub fn with_type(
        mut self,
        node_type: impl Into<String>,
    ) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_ports(
        mut self,
        ports: Vec<PortInfo>,
    ) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_branches(
        mut self,
        branches: Vec<BranchInfo>,
    ) -> Self {
        self.branches = branches;
        self
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.position.x, self.position.y, self.size.width, self.size.height)
    }

    pub fn has_port(
        &self,
        id: &str,
        group: PortDirection,
    ) -> bool {
        self.ports.iter().any(|p| p.id == id && p.group == group)
    }

    pub fn branch(
        &self,
        id: &str,
    ) -> Option<&BranchInfo> {
        self.branches.iter().find(|b| b.id == id)
    }

    /// `in` port position at `position`: top-center, for top-to-bottom layouts.
    pub fn in_port_at(
        &self,
        position: Point,
    ) -> Point {
        Point::new(position.x + self.size.width / 2.0, position.y)
    }

    pub fn in_port(&self) -> Point {
        self.in_port_at(self.position)
    }

    /// `out` port position: bottom-center.
    pub fn out_port(&self) -> Point {
        Point::new(self.position.x + self.size.width / 2.0, self.position.y + self.size.height)
    }
}
