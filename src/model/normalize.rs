//! Conversion of raw surface edges into the canonical [`Edge`].
//!
//! Surface edges come from several writers and carry their bookkeeping loosely; this is the one
//! place that interprets them. Everything past this point works on [`Edge`] only.

use crate::{
    FlowlinesError, Result,
    model::{BranchInfo, Edge, EdgeKind, EdgeState, Endpoint, OUT_PORT},
    surface::{EdgeRenderData, VisualEdge},
};

impl TryFrom<&VisualEdge> for Edge {
    type Error = FlowlinesError;

    fn try_from(visual: &VisualEdge) -> Result<Self> {
        if visual.id.is_empty() {
            return Err(FlowlinesError::MissingId("edge id".to_string()));
        }
        if visual.source.is_empty() {
            return Err(FlowlinesError::MissingId(format!("source node of edge {}", visual.id)));
        }
        let data: EdgeRenderData = if visual.data.is_null() {
            EdgeRenderData::default()
        } else {
            serde_json::from_value(visual.data.clone()).map_err(|e| FlowlinesError::Convert(format!("invalid data on edge {}: {}", visual.id, e)))?
        };

        let target_node = visual.target.as_deref().filter(|t| !t.is_empty());
        let kind = match data.kind {
            Some(kind) => kind,
            None if data.is_preview => EdgeKind::Preview,
            None if data.is_connected || target_node.is_some() => EdgeKind::Connection,
            None => EdgeKind::Preview,
        };
        if kind == EdgeKind::Preview && target_node.is_some() {
            return Err(FlowlinesError::InvalidEdge(format!("preview line {} has a target", visual.id)));
        }

        let branch = data.branch_id.clone().map(|id| BranchInfo {
            label: data.branch_label.clone().unwrap_or_else(|| id.clone()),
            ordinal: data.branch_index.unwrap_or(0),
            color: data.branch_color.clone(),
            id,
        });

        let mut edge = match (kind, target_node) {
            (EdgeKind::Connection, Some(target)) => Edge::connection(visual.id.clone(), visual.source.clone(), target, branch),
            (EdgeKind::Connection, None) => return Err(FlowlinesError::InvalidEdge(format!("connection {} has no target", visual.id))),
            (EdgeKind::Temporary, _) => Edge::temporary(visual.id.clone(), visual.source.clone()),
            (EdgeKind::Preview, _) => Edge::preview(visual.id.clone(), visual.source.clone(), branch),
        };
        edge.source = Endpoint::new(visual.source.clone(), visual.source_port.clone().unwrap_or_else(|| OUT_PORT.to_string()));
        if let (Some(target), Some(port)) = (edge.target.as_mut(), visual.target_port.as_ref()) {
            target.port_id = port.clone();
        }
        edge.free_end = visual.target_point;
        if let Some(state) = data.state.filter(|s| s.belongs_to(kind)) {
            edge.state = state;
        } else {
            edge.state = EdgeState::initial_for(kind);
        }
        if let Some(creator) = data.created_by {
            edge.metadata.created_by = creator;
        }
        if let Some(version) = data.version {
            edge.metadata.version = version;
        }
        edge.validate();
        Ok(edge)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{model::Point, surface::EdgeRenderConfig};

    fn visual(
        target: Option<&str>,
        data: serde_json::Value,
    ) -> VisualEdge {
        VisualEdge {
            id: "v1".to_string(),
            source: "n1".to_string(),
            source_port: None,
            target: target.map(str::to_string),
            target_port: None,
            target_point: None,
            data,
        }
    }

    #[test]
    fn test_render_config_round_trips_through_visual() {
        let mut e = Edge::preview("p1", "n1", Some(BranchInfo::new("b1", "One", 2)));
        e.free_end = Some(Point::new(1.0, 2.0));
        let v = VisualEdge::from_config(&EdgeRenderConfig::from_edge(&e)).unwrap();
        let back = Edge::try_from(&v).unwrap();
        assert_eq!(back.kind, EdgeKind::Preview);
        assert_eq!(back.branch, e.branch);
        assert_eq!(back.free_end, e.free_end);
        assert_eq!(back.connection_key(), e.connection_key());
    }

    #[test]
    fn test_kind_inferred_from_target_without_data() {
        let e = Edge::try_from(&visual(Some("n2"), serde_json::Value::Null)).unwrap();
        assert!(e.is_connection());
        assert_eq!(e.target_node(), Some("n2"));
        assert_eq!(e.state, EdgeState::Active);
    }

    #[test]
    fn test_preview_flag_wins_over_missing_type() {
        let e = Edge::try_from(&visual(None, json!({"isPreview": true, "state": "hover"}))).unwrap();
        assert!(e.is_preview());
        assert_eq!(e.state, EdgeState::Hover);
    }

    #[test]
    fn test_state_from_wrong_set_is_reset() {
        let e = Edge::try_from(&visual(Some("n2"), json!({"type": "connection", "state": "dragging"}))).unwrap();
        assert_eq!(e.state, EdgeState::Active);
    }

    #[test]
    fn test_preview_with_target_rejected() {
        assert!(Edge::try_from(&visual(Some("n2"), json!({"type": "preview"}))).is_err());
        assert!(Edge::try_from(&visual(None, json!({"type": "connection"}))).is_err());
    }

    #[test]
    fn test_missing_source_rejected() {
        let mut v = visual(None, serde_json::Value::Null);
        v.source.clear();
        assert_eq!(Edge::try_from(&v).unwrap_err(), FlowlinesError::MissingId("source node of edge v1".to_string()));
    }
}
