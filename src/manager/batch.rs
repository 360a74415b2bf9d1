//! Queued creation and removal, drained through the operation batcher.

use std::{collections::HashSet, time::Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    FlowlinesError, Result,
    common::Priority,
    manager::{EdgeLifecycleManager, EdgeOutcome, PreviewOptions, RemoveOptions, SkippedItem},
    model::{EdgeId, NodeId},
};

const PREVIEW_CREATE: &str = "preview:create";
const EDGE_REMOVE: &str = "edge:remove";

#[derive(Debug, Clone)]
pub enum PendingOp {
    CreatePreview {
        source_node_id: NodeId,
        options: PreviewOptions,
    },
    Remove {
        edge_id: EdgeId,
        options: RemoveOptions,
    },
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub applied: usize,
    /// Edges taken out by queued removals.
    pub removed: Vec<EdgeId>,
    pub failed: Vec<SkippedItem>,
    #[serde(skip)]
    errors: Vec<(String, FlowlinesError)>,
}

impl FlushReport {
    fn fail(
        &mut self,
        id: String,
        error: FlowlinesError,
    ) {
        warn!("manager::flush failed for {}: {}", id, error);
        self.failed.push(SkippedItem {
            id: id.clone(),
            reason: error.to_string(),
        });
        self.errors.push((id, error));
    }
}

impl EdgeLifecycleManager {
    /// Queue a preview creation. Returns `false` when the same `(source, branch)` is already
    /// queued.
    pub fn queue_preview_creation(
        &mut self,
        source_node_id: &str,
        options: PreviewOptions,
        priority: Priority,
    ) -> bool {
        let key = format!("{}/{}", source_node_id, options.branch.as_ref().map_or("default", |b| b.id.as_str()));
        self.batcher.submit(
            PREVIEW_CREATE,
            key,
            priority,
            PendingOp::CreatePreview {
                source_node_id: source_node_id.to_string(),
                options,
            },
        )
    }

    /// Queue a removal. Unknown edges, edges being removed and edges already queued are refused.
    pub fn queue_removal(
        &mut self,
        edge_id: &str,
        priority: Priority,
    ) -> bool {
        if self.removing.contains(edge_id) || !self.store.contains(edge_id) {
            debug!("manager::queue_removal({}) refused", edge_id);
            return false;
        }
        self.batcher.submit(
            EDGE_REMOVE,
            edge_id,
            priority,
            PendingOp::Remove {
                edge_id: edge_id.to_string(),
                options: RemoveOptions::default(),
            },
        )
    }

    pub fn pending_operations(&self) -> usize {
        self.batcher.len()
    }

    /// Drop everything queued.
    pub fn cancel_pending(&mut self) -> usize {
        let n = self.batcher.cancel_all();
        debug!("manager::cancel_pending dropped {}", n);
        n
    }

    /// Apply every queued operation, high priority first. One failing item does not stop the
    /// others.
    pub fn flush_pending(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        let mut batcher = std::mem::take(&mut self.batcher);
        report.applied = batcher.flush_with(|_, items| {
            let mut applied = 0;
            for op in items {
                if self.apply(op, &mut report) {
                    applied += 1;
                }
            }
            applied
        });
        self.batcher = batcher;
        report
    }

    /// Flush once the oldest queued operation has waited a full frame.
    pub fn flush_if_due(&mut self) -> Option<FlushReport> {
        self.batcher.is_due(Instant::now()).then(|| self.flush_pending())
    }

    /// Remove several edges; batched when enabled and more than one is given. Unknown ids are
    /// ignored and a failing removal does not stop the rest. Returns how many of `ids` were
    /// removed, or the first removal error.
    pub fn remove_edges(
        &mut self,
        ids: &[EdgeId],
    ) -> Result<usize> {
        if self.config.enable_batch_operations && ids.len() > 1 {
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
            for id in ids {
                self.queue_removal(id, Priority::Normal);
            }
            // the flush also applies whatever else was queued; only our ids count
            let mut report = self.flush_pending();
            if let Some(pos) = report.errors.iter().position(|(id, _)| wanted.contains(id.as_str())) {
                return Err(report.errors.swap_remove(pos).1);
            }
            return Ok(report.removed.iter().filter(|id| wanted.contains(id.as_str())).count());
        }
        let mut removed = 0;
        let mut first_error = None;
        for id in ids {
            if !self.store.contains(id) {
                continue;
            }
            match self.remove_edge(id, RemoveOptions::default()) {
                Ok(Some(_)) => removed += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("manager::remove_edges failed for {}: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Remove every preview line leaving `node_id`.
    pub fn remove_node_preview_lines(
        &mut self,
        node_id: &str,
    ) -> Result<usize> {
        let ids = self.store.node_previews(node_id);
        self.remove_edges(&ids)
    }

    /// Apply one queued operation. Returns whether it changed the collection.
    fn apply(
        &mut self,
        op: PendingOp,
        report: &mut FlushReport,
    ) -> bool {
        match op {
            PendingOp::CreatePreview {
                source_node_id,
                options,
            } => match self.create_preview_line(&source_node_id, options) {
                Ok(outcome) => matches!(outcome, EdgeOutcome::Created(_)),
                Err(e) => {
                    report.fail(source_node_id, e);
                    false
                }
            },
            PendingOp::Remove {
                edge_id,
                options,
            } => {
                if !self.store.contains(&edge_id) {
                    return false;
                }
                match self.remove_edge(&edge_id, options) {
                    Ok(Some(_)) => {
                        report.removed.push(edge_id);
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        report.fail(edge_id, e);
                        false
                    }
                }
            }
        }
    }
}
