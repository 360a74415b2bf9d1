mod edge;
mod geometry;
mod node;
mod normalize;
mod state;

pub use edge::{
    CONNECTION_STROKE, EDGE_SCHEMA_VERSION, Edge, EdgeId, EdgeMetadata, EdgeStyle, Endpoint, Marker, PREVIEW_STROKE, RenderFlags, connection_key, source_slot_key,
    target_slot_key,
};
pub use geometry::{Point, Rect, Size};
pub use node::{BranchInfo, IN_PORT, NodeId, NodeInfo, OUT_PORT, PortDirection, PortInfo};
pub use state::{EdgeKind, EdgeState, StateTransition};
