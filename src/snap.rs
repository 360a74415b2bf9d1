//! Snap detection while a node is dragged.
//!
//! The dragged node's `in` port sits at the top-center of its bounds. Every candidate preview
//! line's free endpoint is measured against that port; the nearest one under the threshold is
//! reported together with a highlight request for the UI. Rendering the highlight is up to the
//! caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    Result,
    common::MemCache,
    model::{Edge, EdgeId, NodeId, Point},
    surface::RenderSurface,
};

pub const DEFAULT_SNAP_THRESHOLD: f64 = 40.0;
pub const DEFAULT_MAX_CHECK_DISTANCE: f64 = 200.0;
pub const DEFAULT_PREVIEW_LENGTH: f64 = 80.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapConfig {
    /// Distance under which an endpoint snaps.
    pub threshold: f64,
    /// Endpoints at or beyond this distance are not evaluated.
    pub max_check_distance: f64,
    /// Length of a preview line whose free end was never placed.
    pub preview_length: f64,
    pub highlight_radius: f64,
    pub highlight_color: String,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SNAP_THRESHOLD,
            max_check_distance: DEFAULT_MAX_CHECK_DISTANCE,
            preview_length: DEFAULT_PREVIEW_LENGTH,
            highlight_radius: 12.0,
            highlight_color: "#52c41a".to_string(),
            cache_capacity: 256,
            cache_ttl: Duration::from_millis(500),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SnapReason {
    Snapped,
    NodeNotFound,
    NoPreviewLines,
    OutOfRange,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapTarget {
    pub preview_line_id: EdgeId,
    pub source_node_id: NodeId,
    pub branch_id: Option<String>,
    /// World position of the dragged node's `in` port.
    pub port_position: Point,
    pub endpoint: Point,
    pub distance: f64,
}

/// What the UI should highlight on a hit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapHighlight {
    pub center: Point,
    pub radius: f64,
    pub color: String,
    pub animation: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapResult {
    pub can_snap: bool,
    pub reason: SnapReason,
    pub snap_target: Option<SnapTarget>,
    pub highlight: Option<SnapHighlight>,
    pub hint: Option<String>,
}

impl SnapResult {
    fn miss(reason: SnapReason) -> Self {
        Self {
            can_snap: false,
            reason,
            snap_target: None,
            highlight: None,
            hint: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapStats {
    pub checks: u64,
    pub cache_hits: u64,
    pub snaps: u64,
    pub evaluated: u64,
    pub rejected_far: u64,
}

/// Node id, rounded node position, and each candidate's id with its rounded endpoint, sorted.
type SnapKey = (NodeId, (i64, i64), Vec<(EdgeId, i64, i64)>);

pub struct SnapDetector {
    config: SnapConfig,
    memo: MemCache<SnapKey, SnapResult>,
    stats: SnapStats,
}

impl Default for SnapDetector {
    fn default() -> Self {
        Self::new(SnapConfig::default())
    }
}

impl SnapDetector {
    pub fn new(config: SnapConfig) -> Self {
        let memo = MemCache::new(config.cache_capacity, config.cache_ttl);
        Self {
            config,
            memo,
            stats: SnapStats::default(),
        }
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    pub fn stats(&self) -> SnapStats {
        self.stats
    }

    pub fn invalidate(&self) {
        self.memo.invalidate_all();
    }

    /// Where the free end of `line` currently is.
    ///
    /// A line that was never dragged hangs `preview_length` below its source port.
    pub fn endpoint_of(
        &self,
        line: &Edge,
        surface: &dyn RenderSurface,
    ) -> Result<Option<Point>> {
        if let Some(p) = line.free_end {
            return Ok(Some(p));
        }
        let start = match line.source.point {
            Some(p) => Some(p),
            None => surface.get_node(&line.source.node_id)?.map(|n| n.out_port()),
        };
        Ok(start.map(|p| p.offset(0.0, self.config.preview_length)))
    }

    /// Find the preview line whose free end is nearest to the `in` port of `node_id` placed at
    /// `node_position`. Lines leaving the node itself are ignored.
    pub fn check_node_snap_to_preview_lines<'a>(
        &mut self,
        node_id: &str,
        node_position: Point,
        preview_lines: impl IntoIterator<Item = &'a Edge>,
        surface: &dyn RenderSurface,
    ) -> Result<SnapResult> {
        self.stats.checks += 1;
        let Some(node) = surface.get_node(node_id)? else {
            return Ok(SnapResult::miss(SnapReason::NodeNotFound));
        };
        let port = node.in_port_at(node_position);

        let mut candidates = Vec::new();
        for line in preview_lines {
            if !line.is_preview() || line.source.node_id == node_id {
                continue;
            }
            if let Some(end) = self.endpoint_of(line, surface)? {
                candidates.push((line, end));
            }
        }
        if candidates.is_empty() {
            return Ok(SnapResult::miss(SnapReason::NoPreviewLines));
        }

        let mut fingerprint: Vec<_> = candidates.iter().map(|(l, p)| (l.id.clone(), p.x.round() as i64, p.y.round() as i64)).collect();
        fingerprint.sort();
        let key = (node_id.to_string(), (node_position.x.round() as i64, node_position.y.round() as i64), fingerprint);
        if let Some(hit) = self.memo.get(&key) {
            self.stats.cache_hits += 1;
            return Ok(hit);
        }

        let mut best: Option<(&Edge, Point, f64)> = None;
        for (line, end) in candidates {
            let d = end.distance_to(&port);
            if d >= self.config.max_check_distance {
                self.stats.rejected_far += 1;
                continue;
            }
            self.stats.evaluated += 1;
            // strict comparison keeps the first-seen line on ties
            if d < self.config.threshold && best.is_none_or(|(_, _, b)| d < b) {
                best = Some((line, end, d));
            }
        }

        let result = match best {
            Some((line, end, distance)) => {
                trace!("snap::hit({} <- {}, {:.1})", node_id, line.id, distance);
                self.stats.snaps += 1;
                SnapResult {
                    can_snap: true,
                    reason: SnapReason::Snapped,
                    snap_target: Some(SnapTarget {
                        preview_line_id: line.id.clone(),
                        source_node_id: line.source.node_id.clone(),
                        branch_id: line.branch_id().map(str::to_string),
                        port_position: port,
                        endpoint: end,
                        distance,
                    }),
                    highlight: Some(SnapHighlight {
                        center: port,
                        radius: self.config.highlight_radius,
                        color: self.config.highlight_color.clone(),
                        animation: "pulse".to_string(),
                    }),
                    hint: Some(match &line.branch {
                        Some(b) => format!("release to connect branch '{}' of {} to {}", b.label, line.source.node_id, node_id),
                        None => format!("release to connect {} to {}", line.source.node_id, node_id),
                    }),
                }
            }
            None => SnapResult::miss(SnapReason::OutOfRange),
        };
        self.memo.set(key, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{BranchInfo, NodeInfo, Size},
        surface::MemSurface,
    };

    fn setup() -> (MemSurface, SnapDetector) {
        let surface = MemSurface::new();
        surface.add_node(NodeInfo::new("target", Point::new(100.0, 100.0), Size::new(120.0, 60.0)));
        surface.add_node(NodeInfo::new("src", Point::new(100.0, -200.0), Size::new(120.0, 60.0)));
        (surface, SnapDetector::default())
    }

    fn line(
        id: &str,
        end: Point,
    ) -> Edge {
        let mut e = Edge::preview(id, "src", None);
        e.free_end = Some(end);
        e
    }

    #[test]
    fn test_snaps_to_top_center_port() {
        let (surface, mut snap) = setup();
        let lines = vec![line("p1", Point::new(160.0, 101.0))];
        let r = snap.check_node_snap_to_preview_lines("target", Point::new(100.0, 100.0), &lines, &surface).unwrap();
        assert!(r.can_snap);
        let target = r.snap_target.unwrap();
        assert_eq!(target.port_position, Point::new(160.0, 100.0));
        assert_eq!(target.preview_line_id, "p1");
        assert_eq!(target.distance, 1.0);
        assert!(r.highlight.is_some());
        assert_eq!(r.hint.as_deref(), Some("release to connect src to target"));
    }

    #[test]
    fn test_far_endpoint_does_not_snap() {
        let (surface, mut snap) = setup();
        let lines = vec![line("p1", Point::new(400.0, 400.0))];
        let r = snap.check_node_snap_to_preview_lines("target", Point::new(100.0, 100.0), &lines, &surface).unwrap();
        assert!(!r.can_snap);
        assert_eq!(r.reason, SnapReason::OutOfRange);
        assert_eq!(snap.stats().rejected_far, 1);
    }

    #[test]
    fn test_moved_endpoint_is_not_served_from_cache() {
        let (surface, mut snap) = setup();
        let mut lines = vec![line("p1", Point::new(160.0, 101.0))];
        assert!(snap.check_node_snap_to_preview_lines("target", Point::new(100.0, 100.0), &lines, &surface).unwrap().can_snap);
        lines[0].free_end = Some(Point::new(400.0, 400.0));
        assert!(!snap.check_node_snap_to_preview_lines("target", Point::new(100.0, 100.0), &lines, &surface).unwrap().can_snap);
    }

    #[test]
    fn test_nearest_wins_and_ties_keep_first() {
        let (surface, mut snap) = setup();
        let lines = vec![line("far", Point::new(160.0, 130.0)), line("near", Point::new(165.0, 100.0)), line("tie", Point::new(155.0, 100.0))];
        let r = snap.check_node_snap_to_preview_lines("target", Point::new(100.0, 100.0), &lines, &surface).unwrap();
        assert_eq!(r.snap_target.unwrap().preview_line_id, "near");
    }

    #[test]
    fn test_repeat_frame_hits_cache() {
        let (surface, mut snap) = setup();
        let lines = vec![line("p1", Point::new(160.0, 101.0))];
        snap.check_node_snap_to_preview_lines("target", Point::new(100.2, 100.0), &lines, &surface).unwrap();
        snap.check_node_snap_to_preview_lines("target", Point::new(99.9, 100.1), &lines, &surface).unwrap();
        assert_eq!(snap.stats().cache_hits, 1);
    }

    #[test]
    fn test_own_lines_and_missing_node() {
        let (surface, mut snap) = setup();
        let mut own = Edge::preview("own", "target", None);
        own.free_end = Some(Point::new(160.0, 100.0));
        let r = snap.check_node_snap_to_preview_lines("target", Point::new(100.0, 100.0), [&own], &surface).unwrap();
        assert_eq!(r.reason, SnapReason::NoPreviewLines);

        let r = snap.check_node_snap_to_preview_lines("ghost", Point::default(), [&own], &surface).unwrap();
        assert_eq!(r.reason, SnapReason::NodeNotFound);
    }

    #[test]
    fn test_undragged_line_hangs_below_source() {
        let (surface, snap) = setup();
        let e = Edge::preview("p1", "src", Some(BranchInfo::new("b", "B", 0)));
        // src out port is (160, -140)
        assert_eq!(snap.endpoint_of(&e, &surface).unwrap(), Some(Point::new(160.0, -60.0)));
    }
}
