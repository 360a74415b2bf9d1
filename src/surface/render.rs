//! Render configuration handed to the drawing surface.

use serde::{Deserialize, Serialize};

use crate::model::{Edge, EdgeKind, EdgeState, IN_PORT, Marker, Point};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Named {
    pub name: String,
}

impl Named {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineAttrs {
    pub stroke: String,
    pub stroke_width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_dasharray: Option<String>,
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_marker: Option<Marker>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EdgeAttrs {
    pub line: LineAttrs,
}

/// Bookkeeping carried on the visual so the edge can be recognized when read back.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EdgeRenderData {
    #[serde(rename = "type")]
    pub kind: Option<EdgeKind>,
    pub is_preview: bool,
    pub is_connected: bool,
    pub state: Option<EdgeState>,
    pub branch_id: Option<String>,
    pub branch_label: Option<String>,
    pub branch_index: Option<usize>,
    pub branch_color: Option<String>,
    pub created_by: Option<String>,
    pub version: Option<String>,
}

/// Everything the surface needs to draw one edge.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRenderConfig {
    pub id: String,
    pub source: String,
    pub source_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
    /// Dangling end for preview lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_point: Option<Point>,
    pub attrs: EdgeAttrs,
    pub data: EdgeRenderData,
    pub router: Named,
    pub connector: Named,
    pub z_index: i32,
    pub visible: bool,
}

impl EdgeRenderConfig {
    /// Build the surface config for `edge`. Preview lines get a dashed stroke and no arrowhead,
    /// connections a solid stroke with a block arrowhead.
    pub fn from_edge(edge: &Edge) -> Self {
        let target = edge.target.as_ref();
        let branch = edge.branch.as_ref();
        Self {
            id: edge.id.clone(),
            source: edge.source.node_id.clone(),
            source_port: edge.source.port_id.clone(),
            target: target.map(|t| t.node_id.clone()),
            target_port: target.map(|_| IN_PORT.to_string()),
            target_point: if target.is_none() { edge.free_end } else { None },
            attrs: EdgeAttrs {
                line: LineAttrs {
                    stroke: edge.style.stroke.clone(),
                    stroke_width: edge.style.stroke_width,
                    stroke_dasharray: edge.style.stroke_dasharray.clone(),
                    opacity: edge.style.opacity,
                    target_marker: edge.style.target_marker.clone(),
                },
            },
            data: EdgeRenderData {
                kind: Some(edge.kind),
                is_preview: edge.kind == EdgeKind::Preview,
                is_connected: edge.kind == EdgeKind::Connection,
                state: Some(edge.state),
                branch_id: branch.map(|b| b.id.clone()),
                branch_label: branch.map(|b| b.label.clone()),
                branch_index: branch.map(|b| b.ordinal),
                branch_color: branch.and_then(|b| b.color.clone()),
                created_by: Some(edge.metadata.created_by.clone()),
                version: Some(edge.metadata.version.clone()),
            },
            router: Named::new(if edge.is_connection() { "manhattan" } else { "normal" }),
            connector: Named::new("rounded"),
            z_index: edge.flags.z_index,
            visible: edge.flags.visible,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{BranchInfo, Endpoint};

    #[test]
    fn test_preview_config_is_dashed_without_marker() {
        let mut e = Edge::preview("p1", "n1", None);
        e.free_end = Some(Point::new(10.0, 90.0));
        let cfg = EdgeRenderConfig::from_edge(&e);
        assert_eq!(cfg.source_port, "out");
        assert!(cfg.target.is_none());
        assert_eq!(cfg.target_point, Some(Point::new(10.0, 90.0)));
        assert_eq!(cfg.attrs.line.stroke_dasharray.as_deref(), Some("5,5"));
        assert!(cfg.attrs.line.target_marker.is_none());
        assert!(cfg.data.is_preview);
    }

    #[test]
    fn test_connection_config_serializes_camel_case() {
        let mut e = Edge::preview("c1", "n1", Some(BranchInfo::new("b2", "B", 1)));
        e.convert_to_connection(Endpoint::target("n2")).unwrap();
        let value = serde_json::to_value(EdgeRenderConfig::from_edge(&e)).unwrap();
        assert_eq!(value["sourcePort"], "out");
        assert_eq!(value["target"], "n2");
        assert_eq!(value["targetPort"], "in");
        assert_eq!(value["attrs"]["line"]["targetMarker"], json!({"name": "block", "width": 8.0, "height": 8.0}));
        assert_eq!(value["data"]["type"], "connection");
        assert_eq!(value["data"]["isConnected"], true);
        assert_eq!(value["data"]["branchId"], "b2");
        assert_eq!(value["data"]["branchIndex"], 1);
        assert!(value["attrs"]["line"].get("strokeDasharray").is_none());
    }
}
