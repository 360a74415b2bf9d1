//! Periodic cleanup and diagnosis.
//!
//! Cleanup only removes what it has positively confirmed to be gone. A lookup that fails is
//! treated as unknown and the edge is skipped until the next sweep. Connections whose both
//! nodes exist are never removed; if their visual is missing it is drawn again.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    Result,
    events::{EdgeEvent, RemovalReason},
    manager::{EdgeLifecycleManager, RemoveOptions},
    model::{EdgeId, EdgeKind, NodeId, PortDirection},
    surface::{EdgeRenderConfig, RenderSurface},
    utils,
    validation::{InvariantViolation, check_invariants},
};

/// An item a pass could not decide on.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub id: String,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub checked: usize,
    pub removed: Vec<EdgeId>,
    /// Protected connections whose visual had to be drawn again.
    pub rematerialized: Vec<EdgeId>,
    pub protected: usize,
    pub skipped: Vec<SkippedItem>,
    pub at: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LimitViolation {
    pub node_id: NodeId,
    pub direction: PortDirection,
    pub count: usize,
    pub limit: usize,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct DiagnosisReport {
    pub checked: usize,
    /// Duplicate keys, port conflicts, coupling and state violations.
    pub violations: Vec<InvariantViolation>,
    pub orphaned_previews: Vec<EdgeId>,
    pub invalid_connections: Vec<EdgeId>,
    pub limit_violations: Vec<LimitViolation>,
    pub skipped: Vec<SkippedItem>,
    pub at: i64,
}

impl DiagnosisReport {
    pub fn problem_count(&self) -> usize {
        self.violations.len() + self.orphaned_previews.len() + self.invalid_connections.len() + self.limit_violations.len()
    }

    pub fn has_problems(&self) -> bool {
        self.problem_count() > 0
    }
}

/// What a `run_due_maintenance` call ran.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct MaintenanceTick {
    pub cleanup: Option<CleanupReport>,
    pub diagnosis: Option<DiagnosisReport>,
}

enum Presence {
    Present,
    Gone,
    Unknown(String),
}

impl Presence {
    fn of_node(
        surface: &dyn RenderSurface,
        id: &str,
    ) -> Self {
        match surface.get_node(id) {
            Ok(Some(_)) => Presence::Present,
            Ok(None) => Presence::Gone,
            Err(e) => Presence::Unknown(e.to_string()),
        }
    }

    fn of_cell(
        surface: &dyn RenderSurface,
        id: &str,
    ) -> Self {
        match surface.get_cell_by_id(id) {
            Ok(Some(_)) => Presence::Present,
            Ok(None) => Presence::Gone,
            Err(e) => Presence::Unknown(e.to_string()),
        }
    }

    fn is_present(&self) -> bool {
        matches!(self, Presence::Present)
    }

    fn is_gone(&self) -> bool {
        matches!(self, Presence::Gone)
    }

    fn unknown(&self) -> Option<&str> {
        match self {
            Presence::Unknown(reason) => Some(reason),
            _ => None,
        }
    }
}

impl EdgeLifecycleManager {
    /// One cleanup sweep. Removes edges without a visual, failing validation, or whose nodes are
    /// gone; never removes a connection whose both nodes exist.
    pub fn cleanup(&mut self) -> Result<CleanupReport> {
        let surface = self.surface()?;
        let mut report = CleanupReport {
            at: utils::time::time_millis(),
            ..Default::default()
        };

        for id in self.store.ids() {
            let Some(edge) = self.store.get(&id).cloned() else {
                continue;
            };
            report.checked += 1;

            // stop at the first failed lookup, the edge is revisited next sweep
            let source = Presence::of_node(surface.as_ref(), &edge.source.node_id);
            if let Some(reason) = source.unknown() {
                report.skipped.push(skipped(&id, reason));
                continue;
            }
            let target = edge.target_node().map(|t| Presence::of_node(surface.as_ref(), t));
            if let Some(reason) = target.as_ref().and_then(|t| t.unknown()) {
                report.skipped.push(skipped(&id, reason));
                continue;
            }
            let visual = Presence::of_cell(surface.as_ref(), &id);
            if let Some(reason) = visual.unknown() {
                report.skipped.push(skipped(&id, reason));
                continue;
            }

            let protected = edge.is_connection() && source.is_present() && target.as_ref().is_some_and(|t| t.is_present());
            if protected {
                report.protected += 1;
                if visual.is_gone() {
                    match surface.add_edge(&EdgeRenderConfig::from_edge(&edge)) {
                        Ok(handle) => {
                            debug!("manager::cleanup redrew {}", id);
                            self.store.set_handle(&id, handle);
                            report.rematerialized.push(id);
                        }
                        Err(e) => report.skipped.push(skipped(&id, &e.to_string())),
                    }
                }
                continue;
            }

            let reason = if source.is_gone() {
                Some("source node missing")
            } else if target.as_ref().is_some_and(|t| t.is_gone()) {
                Some("target node missing")
            } else if visual.is_gone() {
                Some("visual missing")
            } else if !edge.structural_errors().is_empty() {
                Some("failed validation")
            } else {
                None
            };
            let Some(reason) = reason else {
                continue;
            };
            debug!("manager::cleanup removing {}: {}", id, reason);
            let options = RemoveOptions {
                reason: RemovalReason::Cleanup,
                restore: false,
            };
            match self.remove_edge(&id, options) {
                Ok(Some(_)) => report.removed.push(id),
                Ok(None) => {}
                Err(e) => report.skipped.push(skipped(&id, &e.to_string())),
            }
        }

        self.counters.cleanups += 1;
        self.last_cleanup_ms = report.at;
        if !report.removed.is_empty() || !report.skipped.is_empty() {
            info!("manager::cleanup checked {}, removed {}, skipped {}", report.checked, report.removed.len(), report.skipped.len());
        }
        self.events.emit(EdgeEvent::CleanupCompleted {
            report: report.clone(),
        });
        Ok(report)
    }

    /// One diagnosis pass. Reports problems without fixing them.
    pub fn diagnose(&mut self) -> Result<DiagnosisReport> {
        let surface = self.surface()?;
        let mut report = DiagnosisReport {
            checked: self.store.len(),
            violations: check_invariants(self.store.iter()),
            at: utils::time::time_millis(),
            ..Default::default()
        };

        let mut outgoing: HashMap<&str, usize> = HashMap::new();
        let mut incoming: HashMap<&str, usize> = HashMap::new();
        for edge in self.store.iter() {
            match edge.kind {
                EdgeKind::Preview | EdgeKind::Temporary => match Presence::of_node(surface.as_ref(), &edge.source.node_id) {
                    Presence::Gone => report.orphaned_previews.push(edge.id.clone()),
                    Presence::Unknown(reason) => report.skipped.push(skipped(&edge.id, &reason)),
                    Presence::Present => {}
                },
                EdgeKind::Connection => {
                    *outgoing.entry(edge.source.node_id.as_str()).or_default() += 1;
                    if let Some(target) = edge.target_node() {
                        *incoming.entry(target).or_default() += 1;
                    }
                    if !edge.is_valid || !edge.structural_errors().is_empty() {
                        report.invalid_connections.push(edge.id.clone());
                        continue;
                    }
                    let nodes = [Some(edge.source.node_id.as_str()), edge.target_node()];
                    for node in nodes.into_iter().flatten() {
                        match Presence::of_node(surface.as_ref(), node) {
                            Presence::Gone => {
                                report.invalid_connections.push(edge.id.clone());
                                break;
                            }
                            Presence::Unknown(reason) => {
                                report.skipped.push(skipped(&edge.id, &reason));
                                break;
                            }
                            Presence::Present => {}
                        }
                    }
                }
            }
        }

        let limit = self.config.max_connections_per_node;
        for (direction, counts) in [(PortDirection::Out, outgoing), (PortDirection::In, incoming)] {
            let mut over: Vec<_> = counts.into_iter().filter(|(_, n)| *n > limit).collect();
            over.sort();
            for (node, count) in over {
                report.limit_violations.push(LimitViolation {
                    node_id: node.to_string(),
                    direction,
                    count,
                    limit,
                });
            }
        }

        self.counters.diagnoses += 1;
        self.last_diagnosis_ms = report.at;
        if report.has_problems() {
            warn!("manager::diagnose found {} problems", report.problem_count());
            self.events.emit(EdgeEvent::DiagnosisProblemsFound {
                report: report.clone(),
            });
        }
        Ok(report)
    }

    /// Run whichever passes are due at `now_ms`, for hosts that drive time themselves.
    pub fn run_due_maintenance(
        &mut self,
        now_ms: i64,
    ) -> Result<MaintenanceTick> {
        let mut tick = MaintenanceTick::default();
        if self.config.auto_cleanup && now_ms - self.last_cleanup_ms >= self.config.cleanup_interval_ms as i64 {
            tick.cleanup = Some(self.cleanup()?);
            self.last_cleanup_ms = now_ms;
        }
        if now_ms - self.last_diagnosis_ms >= self.config.diagnosis_interval_ms as i64 {
            tick.diagnosis = Some(self.diagnose()?);
            self.last_diagnosis_ms = now_ms;
        }
        Ok(tick)
    }
}

fn skipped(
    id: &str,
    reason: &str,
) -> SkippedItem {
    SkippedItem {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}
