//! The rendering collaborator.
//!
//! The surface draws edges and knows which nodes exist. Flowlines never draws anything itself;
//! it hands [`EdgeRenderConfig`]s over and reads nodes and visuals back through this trait.

mod mem;
mod render;

use serde::{Deserialize, Serialize};

use crate::{
    Result,
    model::{NodeInfo, Point},
};

pub use mem::MemSurface;
pub use render::{EdgeAttrs, EdgeRenderConfig, EdgeRenderData, LineAttrs, Named};

/// Handle the surface returns for a drawn edge.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisualHandle(pub String);

impl VisualHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// A raw edge as the surface stores it, with its bookkeeping as an untyped JSON bag.
///
/// Converted to the canonical [`crate::Edge`] through `TryFrom` before any logic runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VisualEdge {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub source_port: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub target_port: Option<String>,
    #[serde(default)]
    pub target_point: Option<Point>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl VisualEdge {
    pub fn from_config(config: &EdgeRenderConfig) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            source: config.source.clone(),
            source_port: Some(config.source_port.clone()),
            target: config.target.clone(),
            target_port: config.target_port.clone(),
            target_point: config.target_point,
            data: serde_json::to_value(&config.data)?,
        })
    }
}

/// What `get_cell_by_id` can find.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Node(NodeInfo),
    Edge(VisualEdge),
}

impl Cell {
    pub fn as_node(&self) -> Option<&NodeInfo> {
        match self {
            Cell::Node(n) => Some(n),
            Cell::Edge(_) => None,
        }
    }

    pub fn into_node(self) -> Option<NodeInfo> {
        match self {
            Cell::Node(n) => Some(n),
            Cell::Edge(_) => None,
        }
    }
}

/// Drawing surface and host graph.
///
/// Every call may fail; lookups in particular can fail transiently while the host graph is being
/// rebuilt, and callers must not treat an `Err` as "the cell is gone".
pub trait RenderSurface: Send + Sync {
    /// Draw a new edge.
    fn add_edge(
        &self,
        config: &EdgeRenderConfig,
    ) -> Result<VisualHandle>;

    /// Restyle or re-route an existing edge.
    fn update_edge(
        &self,
        handle: &VisualHandle,
        config: &EdgeRenderConfig,
    ) -> Result<()>;

    /// Erase an edge. Erasing an unknown handle is not an error.
    fn remove_edge(
        &self,
        handle: &VisualHandle,
    ) -> Result<()>;

    /// Every edge currently drawn.
    fn get_edges(&self) -> Result<Vec<VisualEdge>>;

    /// Look up a node or an edge visual by id.
    fn get_cell_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Cell>>;

    /// Convenience node lookup.
    fn get_node(
        &self,
        id: &str,
    ) -> Result<Option<NodeInfo>> {
        Ok(self.get_cell_by_id(id)?.and_then(Cell::into_node))
    }
}
