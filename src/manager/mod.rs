//! Edge lifecycle manager.
//!
//! The manager owns the edge collection. Every creation, conversion and removal goes through it:
//! policy is checked by the gatekeeper, the surface is asked to draw, and only then is the edge
//! committed to the store and the spatial indices. If the surface call fails nothing is
//! committed, so the collection never describes a visual the surface refused.

mod batch;
mod maintenance;
mod monitor;
mod query;
mod restore;
mod store;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

pub use batch::{FlushReport, PendingOp};
pub use maintenance::{CleanupReport, DiagnosisReport, LimitViolation, MaintenanceTick, SkippedItem};
pub use monitor::MaintenanceMonitor;
pub use restore::{ConfiguredNodeRestore, NeverRestore, RestorePolicy};
pub use store::EdgeStore;

use crate::{
    Config, FlowlinesError, PolicyViolation, Result,
    common::{BatcherStats, MemCache, OperationBatcher, SpatialIndex, SpatialStats},
    events::{EdgeEvent, EventBus, RemovalReason},
    gatekeeper::{ConnectionGatekeeper, ConnectionOptions, ConnectionOutcome, ConnectionPlan, ConnectionRequest, CreationMethod, EdgeView, GatekeeperStats, ValidationRule},
    model::{BranchInfo, Edge, EdgeId, EdgeKind, EdgeState, Endpoint, NodeInfo, Point, Rect, source_slot_key},
    ports::PortContract,
    snap::{SnapDetector, SnapResult, SnapStats},
    surface::{EdgeRenderConfig, RenderSurface, VisualHandle},
    utils,
    validation::{InvariantViolation, check_invariants},
};

use query::{QueryKey, QueryValue};

/// A manager shared with background maintenance.
pub type SharedManager = Arc<Mutex<EdgeLifecycleManager>>;

/// Result of a creation request that may legitimately find nothing to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeOutcome {
    Created(Edge),
    /// An equivalent edge already existed and is returned as is.
    Existing(Edge),
    Rejected(PolicyViolation),
}

impl EdgeOutcome {
    pub fn edge(&self) -> Option<&Edge> {
        match self {
            EdgeOutcome::Created(e) | EdgeOutcome::Existing(e) => Some(e),
            EdgeOutcome::Rejected(_) => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EdgeOutcome::Created(_))
    }

    pub fn violation(&self) -> Option<&PolicyViolation> {
        match self {
            EdgeOutcome::Rejected(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreviewOptions {
    pub branch: Option<BranchInfo>,
    pub created_by: Option<String>,
    /// Initial free end; defaults to `preview_length` below the source port.
    pub free_end: Option<Point>,
}

impl PreviewOptions {
    pub fn branch(branch: BranchInfo) -> Self {
        Self {
            branch: Some(branch),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub reason: RemovalReason,
    /// Consult the restore policy when a connection is removed.
    pub restore: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            reason: RemovalReason::Requested,
            restore: true,
        }
    }
}

/// What `initialize` / `adopt_surface_edges` found on the surface.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct InitReport {
    pub adopted: usize,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    previews_created: u64,
    connections_created: u64,
    conversions: u64,
    removals: u64,
    restorations: u64,
    cleanups: u64,
    diagnoses: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerStats {
    pub total: usize,
    pub previews: usize,
    pub connections: usize,
    pub invalid: usize,
    pub pending_operations: usize,
    pub previews_created: u64,
    pub connections_created: u64,
    pub conversions: u64,
    pub removals: u64,
    pub restorations: u64,
    pub cleanups: u64,
    pub diagnoses: u64,
    pub cached_queries: u64,
    pub gatekeeper: GatekeeperStats,
    pub snap: SnapStats,
    pub batcher: BatcherStats,
    pub endpoints: SpatialStats,
    pub regions: SpatialStats,
}

pub struct EdgeLifecycleManager {
    config: Config,
    surface: Option<Arc<dyn RenderSurface>>,
    store: EdgeStore,
    /// Free ends of preview lines, for snap prefiltering.
    endpoints: SpatialIndex<EdgeId>,
    /// Bounding boxes of every edge with known geometry.
    regions: SpatialIndex<EdgeId>,
    queries: MemCache<QueryKey, QueryValue>,
    ports: Arc<PortContract>,
    gatekeeper: ConnectionGatekeeper,
    snap: SnapDetector,
    batcher: OperationBatcher<PendingOp>,
    removing: HashSet<EdgeId>,
    restore: Box<dyn RestorePolicy>,
    events: EventBus,
    counters: Counters,
    last_cleanup_ms: i64,
    last_diagnosis_ms: i64,
}

impl EdgeLifecycleManager {
    pub fn new(config: Config) -> Self {
        let restore: Box<dyn RestorePolicy> = if config.restore_previews { Box::new(ConfiguredNodeRestore) } else { Box::new(NeverRestore) };
        Self::with_parts(config, EventBus::new(), restore, Vec::new())
    }

    pub(crate) fn with_parts(
        config: Config,
        events: EventBus,
        restore: Box<dyn RestorePolicy>,
        rules: Vec<Box<dyn ValidationRule>>,
    ) -> Self {
        let ports = Arc::new(PortContract::with_cache(config.enforce_port_direction, config.cache_capacity, config.cache_ttl()));
        let mut gatekeeper = ConnectionGatekeeper::new(ports.clone())
            .allow_direct_creation(config.allow_direct_connection)
            .max_connections_per_node(Some(config.max_connections_per_node))
            .batch_size(config.batch_size);
        for rule in rules {
            gatekeeper.add_rule(rule);
        }
        let now = utils::time::time_millis();
        Self {
            surface: None,
            store: EdgeStore::new(),
            endpoints: SpatialIndex::new(config.spatial_cell_size),
            regions: SpatialIndex::new(config.spatial_cell_size),
            queries: MemCache::new(config.cache_capacity, config.cache_ttl()),
            ports,
            gatekeeper,
            snap: SnapDetector::new(config.snap_config()),
            batcher: OperationBatcher::new(config.batch_size),
            removing: HashSet::new(),
            restore,
            events,
            counters: Counters::default(),
            last_cleanup_ms: now,
            last_diagnosis_ms: now,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn gatekeeper(&self) -> &ConnectionGatekeeper {
        &self.gatekeeper
    }

    /// For locking or unlocking direct creation and adding rules at runtime.
    pub fn gatekeeper_mut(&mut self) -> &mut ConnectionGatekeeper {
        &mut self.gatekeeper
    }

    pub fn set_restore_policy(
        &mut self,
        policy: Box<dyn RestorePolicy>,
    ) {
        debug!("manager::set_restore_policy({})", policy.name());
        self.restore = policy;
    }

    pub fn restore_policy(&self) -> &dyn RestorePolicy {
        self.restore.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.surface.is_some()
    }

    /// Attach the rendering surface and adopt the edges already drawn on it.
    pub fn initialize(
        &mut self,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<InitReport> {
        self.surface = Some(surface);
        let report = self.adopt_surface_edges()?;
        info!("manager::initialize adopted {} edges, skipped {}", report.adopted, report.skipped.len());
        self.events.emit(EdgeEvent::ManagerInitialized {
            adopted: report.adopted,
            skipped: report.skipped.len(),
        });
        Ok(report)
    }

    /// Import visuals the manager does not know yet. Visuals that cannot be normalized or that
    /// would break the collection invariants are skipped and reported.
    pub fn adopt_surface_edges(&mut self) -> Result<InitReport> {
        let surface = self.surface()?;
        let mut report = InitReport::default();
        for visual in surface.get_edges()? {
            if self.store.contains(&visual.id) {
                continue;
            }
            let skip = |reason: String| SkippedItem {
                id: visual.id.clone(),
                reason,
            };
            let mut edge = match Edge::try_from(&visual) {
                Ok(edge) => edge,
                Err(e) => {
                    report.skipped.push(skip(e.to_string()));
                    continue;
                }
            };
            if edge.kind == EdgeKind::Temporary {
                report.skipped.push(skip("temporary edges are not tracked".to_string()));
                continue;
            }
            if self.store.len() >= self.config.max_edges {
                report.skipped.push(skip(PolicyViolation::CapacityReached {
                    limit: self.config.max_edges,
                }
                .to_string()));
                continue;
            }
            if edge.is_connection() && self.store.connection_with_key(&edge.connection_key()).is_some() {
                report.skipped.push(skip(PolicyViolation::DuplicateConnection {
                    key: edge.connection_key(),
                }
                .to_string()));
                continue;
            }
            if let Some((slot, edge_id)) = self.store.conflicts(&edge).into_iter().next() {
                report.skipped.push(skip(PolicyViolation::PortOccupied {
                    slot,
                    edge_id,
                }
                .to_string()));
                continue;
            }
            if edge.is_preview() && self.store.preview_for(&edge.source.node_id, edge.branch_id()).is_some() {
                report.skipped.push(skip(PolicyViolation::PreviewExists {
                    key: edge.connection_key(),
                }
                .to_string()));
                continue;
            }
            // geometry is best effort here; a failed lookup only leaves the edge unplaced
            if let Ok(Some(node)) = surface.get_node(&edge.source.node_id) {
                edge.source.point = Some(node.out_port());
            }
            if let Some(target) = edge.target.as_mut() {
                if let Ok(Some(node)) = surface.get_node(&target.node_id) {
                    target.point = Some(node.in_port());
                }
            }
            trace!("manager::adopt({})", edge.id);
            let handle = VisualHandle(visual.id.clone());
            self.commit(edge, Some(handle));
            report.adopted += 1;
        }
        Ok(report)
    }

    /// Create the preview line for `(source_node_id, branch)`, or return the one that exists.
    pub fn create_preview_line(
        &mut self,
        source_node_id: &str,
        options: PreviewOptions,
    ) -> Result<EdgeOutcome> {
        trace!("manager::create_preview_line({})", source_node_id);
        if source_node_id.is_empty() {
            return Err(FlowlinesError::MissingId("source node id".to_string()));
        }
        let surface = self.surface()?;
        let branch_id = options.branch.as_ref().map(|b| b.id.as_str());
        if let Some(existing) = self.store.preview_for(source_node_id, branch_id) {
            return Ok(EdgeOutcome::Existing(existing.clone()));
        }
        if self.store.len() >= self.config.max_edges {
            return Ok(EdgeOutcome::Rejected(PolicyViolation::CapacityReached {
                limit: self.config.max_edges,
            }));
        }
        let Some(node) = surface.get_node(source_node_id)? else {
            return Ok(EdgeOutcome::Rejected(PolicyViolation::MissingNode {
                node_id: source_node_id.to_string(),
            }));
        };

        if let Some(p) = options.free_end {
            require_finite(p)?;
        }

        let mut edge = Edge::preview(utils::longid(), source_node_id, options.branch);
        let start = node.out_port();
        edge.source.point = Some(start);
        edge.free_end = Some(options.free_end.unwrap_or_else(|| start.offset(0.0, self.config.preview_length)));
        if let Some(creator) = options.created_by {
            edge.metadata.created_by = creator;
        }
        if let Some(violation) = self.slot_conflict(&edge, None) {
            return Ok(EdgeOutcome::Rejected(violation));
        }

        let handle = surface.add_edge(&EdgeRenderConfig::from_edge(&edge))?;
        self.commit(edge.clone(), Some(handle));
        self.counters.previews_created += 1;
        debug!("manager::preview created {} on {}", edge.id, source_node_id);
        self.events.emit(EdgeEvent::PreviewCreated {
            edge: edge.clone(),
        });
        Ok(EdgeOutcome::Created(edge))
    }

    /// Create a connection between two nodes without a preview line. Refused by the gatekeeper
    /// unless direct creation is unlocked.
    pub fn create_connection_via_controller(
        &mut self,
        source_node_id: &str,
        target_node_id: &str,
        options: ConnectionOptions,
    ) -> Result<ConnectionOutcome> {
        trace!("manager::create_connection_via_controller({}, {})", source_node_id, target_node_id);
        let surface = self.surface()?;
        let branch_id = options.branch.as_ref().map(|b| b.id.clone());
        if self.store.len() >= self.config.max_edges && self.store.preview_for(source_node_id, branch_id.as_deref()).is_none() {
            return Ok(ConnectionOutcome::rejected(
                CreationMethod::Direct,
                PolicyViolation::CapacityReached {
                    limit: self.config.max_edges,
                },
            ));
        }
        let created_by = options.created_by.clone();
        let request = ConnectionRequest::Direct {
            source_node_id: source_node_id.to_string(),
            target_node_id: target_node_id.to_string(),
            options,
        };
        let mut outcome = self.gatekeeper.create_connection(&request, &self.store, surface.as_ref())?;
        let Some(plan) = outcome.plan.clone() else {
            return Ok(outcome);
        };

        let mut edge = self.build_connection(&plan, surface.as_ref())?;
        if let Some(creator) = created_by {
            edge.metadata.created_by = creator;
        }
        // the direct path replaces a preview sitting on the same outgoing slot
        let slot = source_slot_key(&plan.source_node_id, &plan.ports.source.port, plan.branch.as_ref().map(|b| b.id.as_str()));
        let replaced = self.store.port_occupant(&slot).filter(|e| e.is_preview()).map(|e| e.id.clone());
        if let Some(violation) = self.slot_conflict(&edge, replaced.as_deref()) {
            return Ok(ConnectionOutcome::rejected(CreationMethod::Direct, violation));
        }

        // the preview goes only once the connection is drawn
        let handle = surface.add_edge(&EdgeRenderConfig::from_edge(&edge))?;
        if let Some(preview) = replaced {
            let removal = self.remove_edge(
                &preview,
                RemoveOptions {
                    reason: RemovalReason::Replaced,
                    restore: false,
                },
            );
            if let Err(e) = removal {
                if let Err(undo) = surface.remove_edge(&handle) {
                    warn!("manager::undo of {} failed: {}", edge.id, undo);
                }
                return Err(e);
            }
        }
        self.commit(edge.clone(), Some(handle));
        self.counters.connections_created += 1;
        info!("manager::connection created {} ({} -> {})", edge.id, source_node_id, target_node_id);
        self.events.emit(EdgeEvent::ConnectionCreated {
            method: CreationMethod::Direct,
            edge: edge.clone(),
        });
        outcome.edge = Some(edge);
        Ok(outcome)
    }

    /// Turn a preview line into a connection to `target_node_id`. The edge keeps its id, branch
    /// and metadata.
    pub fn convert_preview_to_connection(
        &mut self,
        preview_id: &str,
        target_node_id: &str,
        options: ConnectionOptions,
    ) -> Result<ConnectionOutcome> {
        trace!("manager::convert_preview_to_connection({}, {})", preview_id, target_node_id);
        let surface = self.surface()?;
        let request = ConnectionRequest::FromPreviewLine {
            preview_line_id: preview_id.to_string(),
            target_node_id: target_node_id.to_string(),
            options,
        };
        let mut outcome = self.gatekeeper.create_connection(&request, &self.store, surface.as_ref())?;
        let Some(plan) = outcome.plan.clone() else {
            return Ok(outcome);
        };

        let mut edge = self.store.get(preview_id).cloned().ok_or_else(|| FlowlinesError::EdgeNotFound(preview_id.to_string()))?;
        let target = surface.get_node(target_node_id)?.ok_or_else(|| FlowlinesError::NodeNotFound(target_node_id.to_string()))?;
        let port = self.align_to_port(&edge, &target, surface.as_ref())?;
        edge.source.port_id = plan.ports.source.port.clone();
        edge.convert_to_connection(Endpoint::new(target_node_id, plan.ports.target.port.clone()).at(port))?;
        if let Some(violation) = self.slot_conflict(&edge, None) {
            return Ok(ConnectionOutcome::rejected(CreationMethod::PreviewConversion, violation));
        }

        let handle = self.push_visual(surface.as_ref(), &edge)?;
        self.commit(edge.clone(), Some(handle));
        self.counters.conversions += 1;
        self.counters.connections_created += 1;
        info!("manager::preview {} converted ({} -> {})", edge.id, edge.source.node_id, target_node_id);
        self.events.emit(EdgeEvent::PreviewConverted {
            preview_line_id: preview_id.to_string(),
            edge: edge.clone(),
        });
        self.events.emit(EdgeEvent::ConnectionCreated {
            method: CreationMethod::PreviewConversion,
            edge: edge.clone(),
        });
        outcome.edge = Some(edge);
        Ok(outcome)
    }

    /// Remove an edge and its visual. A second removal of an edge already being removed is
    /// dropped and returns `None`.
    pub fn remove_edge(
        &mut self,
        id: &str,
        options: RemoveOptions,
    ) -> Result<Option<Edge>> {
        if id.is_empty() {
            return Err(FlowlinesError::MissingId("edge id".to_string()));
        }
        if self.removing.contains(id) {
            debug!("manager::remove_edge({}) dropped, removal in progress", id);
            return Ok(None);
        }
        if !self.store.contains(id) {
            return Err(FlowlinesError::EdgeNotFound(id.to_string()));
        }
        let surface = self.surface()?;
        self.removing.insert(id.to_string());
        let result = self.remove_guarded(surface.as_ref(), id, options);
        self.removing.remove(id);
        result.map(Some)
    }

    fn remove_guarded(
        &mut self,
        surface: &dyn RenderSurface,
        id: &str,
        options: RemoveOptions,
    ) -> Result<Edge> {
        if let Some(handle) = self.store.handle(id) {
            surface.remove_edge(handle)?;
        }
        let (edge, _) = self.store.remove(id).ok_or_else(|| FlowlinesError::EdgeNotFound(id.to_string()))?;
        self.endpoints.remove(&edge.id);
        self.regions.remove(&edge.id);
        self.invalidate_caches();
        self.counters.removals += 1;
        debug!("manager::removed {} ({})", edge.id, options.reason);
        self.events.emit(EdgeEvent::EdgeRemoved {
            reason: options.reason,
            edge: edge.clone(),
        });
        if edge.is_connection() && options.restore {
            if let Err(e) = self.restore_preview(surface, &edge) {
                warn!("manager::restore after {} failed: {}", edge.id, e);
            }
        }
        Ok(edge)
    }

    fn restore_preview(
        &mut self,
        surface: &dyn RenderSurface,
        removed: &Edge,
    ) -> Result<Option<Edge>> {
        let source = removed.source.node_id.as_str();
        let Some(node) = surface.get_node(source)? else {
            return Ok(None);
        };
        let has_preview = self.store.preview_for(source, removed.branch_id()).is_some();
        if !self.restore.should_restore(removed, &node, has_preview) {
            return Ok(None);
        }
        let options = PreviewOptions {
            branch: removed.branch.clone(),
            created_by: Some("restore".to_string()),
            free_end: None,
        };
        match self.create_preview_line(source, options)? {
            EdgeOutcome::Created(edge) => {
                self.counters.restorations += 1;
                debug!("manager::restored preview {} on {}", edge.id, source);
                self.events.emit(EdgeEvent::PreviewRestored {
                    source_node_id: source.to_string(),
                    removed_connection_id: removed.id.clone(),
                    edge: edge.clone(),
                });
                Ok(Some(edge))
            }
            _ => Ok(None),
        }
    }

    /// Remove every edge touching a node that left the graph. Connections arriving from a
    /// surviving node go through the restore policy.
    pub fn handle_node_removed(
        &mut self,
        node_id: &str,
    ) -> Result<Vec<EdgeId>> {
        if node_id.is_empty() {
            return Err(FlowlinesError::MissingId("node id".to_string()));
        }
        let mut removed = Vec::new();
        for id in self.store.node_edges(node_id) {
            let Some(edge) = self.store.get(&id) else {
                continue;
            };
            let options = RemoveOptions {
                reason: RemovalReason::NodeRemoved,
                restore: edge.is_connection() && edge.source.node_id != node_id,
            };
            if self.remove_edge(&id, options)?.is_some() {
                removed.push(id);
            }
        }
        self.ports.invalidate();
        debug!("manager::handle_node_removed({}) removed {}", node_id, removed.len());
        Ok(removed)
    }

    /// Move the free end of a preview line.
    pub fn update_preview_endpoint(
        &mut self,
        id: &str,
        point: Point,
    ) -> Result<()> {
        require_finite(point)?;
        let surface = self.surface()?;
        let mut edge = self.store.get(id).cloned().ok_or_else(|| FlowlinesError::EdgeNotFound(id.to_string()))?;
        if !edge.is_preview() {
            return Err(FlowlinesError::InvalidEdge(format!("edge {} is not a preview line", id)));
        }
        edge.free_end = Some(point);
        edge.touch();
        let handle = self.push_visual(surface.as_ref(), &edge)?;
        self.commit(edge, Some(handle));
        Ok(())
    }

    /// Drive the state machine of one edge.
    pub fn transition_edge(
        &mut self,
        id: &str,
        state: EdgeState,
    ) -> Result<()> {
        let surface = self.surface()?;
        let mut edge = self.store.get(id).cloned().ok_or_else(|| FlowlinesError::EdgeNotFound(id.to_string()))?;
        edge.transition_to(state)?;
        let handle = self.push_visual(surface.as_ref(), &edge)?;
        self.commit(edge, Some(handle));
        Ok(())
    }

    /// Reapply the default style of an edge and redraw it.
    pub fn restyle(
        &mut self,
        id: &str,
    ) -> Result<()> {
        let surface = self.surface()?;
        let mut edge = self.store.get(id).cloned().ok_or_else(|| FlowlinesError::EdgeNotFound(id.to_string()))?;
        edge.reset_style();
        let handle = self.push_visual(surface.as_ref(), &edge)?;
        self.commit(edge, Some(handle));
        Ok(())
    }

    /// Snap check for `node_id` dragged to `position`, against preview lines whose free end is
    /// near the node's `in` port.
    pub fn check_snap(
        &mut self,
        node_id: &str,
        position: Point,
    ) -> Result<SnapResult> {
        let surface = self.surface()?;
        let port = match surface.get_node(node_id)? {
            Some(node) => node.in_port_at(position),
            None => position,
        };
        let mut ids: Vec<EdgeId> = self.endpoints.query_radius(port, self.config.snap_max_check_distance).into_iter().map(|(id, _)| id).collect();
        // collection order, so ties go to the same line every frame
        ids.sort();
        let candidates: Vec<&Edge> = ids.iter().filter_map(|id| self.store.get(id)).collect();
        self.snap.check_node_snap_to_preview_lines(node_id, position, candidates, surface.as_ref())
    }

    /// Edges whose bounding box overlaps `region`.
    pub fn edges_in_region(
        &self,
        region: &Rect,
    ) -> Vec<&Edge> {
        let mut ids = self.regions.query(region);
        ids.sort();
        ids.iter().filter_map(|id| self.store.get(id)).collect()
    }

    pub fn render_config(
        &self,
        id: &str,
    ) -> Option<EdgeRenderConfig> {
        self.store.get(id).map(EdgeRenderConfig::from_edge)
    }

    /// Refresh `is_valid` on every edge and check the collection invariants.
    pub fn validate_all(&mut self) -> Vec<InvariantViolation> {
        for id in self.store.ids() {
            self.store.update(&id, |e| e.validate());
        }
        let violations = check_invariants(self.store.iter());
        if !violations.is_empty() {
            warn!("manager::validate_all found {} violations", violations.len());
        }
        violations
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            total: self.store.len(),
            previews: self.store.count(EdgeKind::Preview),
            connections: self.store.count(EdgeKind::Connection),
            invalid: self.store.iter().filter(|e| !e.is_valid).count(),
            pending_operations: self.batcher.len(),
            previews_created: self.counters.previews_created,
            connections_created: self.counters.connections_created,
            conversions: self.counters.conversions,
            removals: self.counters.removals,
            restorations: self.counters.restorations,
            cleanups: self.counters.cleanups,
            diagnoses: self.counters.diagnoses,
            cached_queries: self.queries.len(),
            gatekeeper: self.gatekeeper.stats(),
            snap: self.snap.stats(),
            batcher: self.batcher.stats(),
            endpoints: self.endpoints.stats(),
            regions: self.regions.stats(),
        }
    }

    fn surface(&self) -> Result<Arc<dyn RenderSurface>> {
        self.surface.clone().ok_or(FlowlinesError::SurfaceUnavailable)
    }

    fn build_connection(
        &self,
        plan: &ConnectionPlan,
        surface: &dyn RenderSurface,
    ) -> Result<Edge> {
        let mut edge = Edge::connection(plan.connection_id.clone(), plan.source_node_id.clone(), plan.target_node_id.clone(), plan.branch.clone());
        edge.source.port_id = plan.ports.source.port.clone();
        edge.source.point = surface.get_node(&plan.source_node_id)?.map(|n| n.out_port());
        if let Some(target) = edge.target.as_mut() {
            target.port_id = plan.ports.target.port.clone();
            target.point = surface.get_node(&plan.target_node_id)?.map(|n| n.in_port());
        }
        edge.metadata.created_by = plan.ports.metadata.created_by.clone();
        Ok(edge)
    }

    /// Exact `in` port position for a conversion. A snap hit is preferred; otherwise the port of
    /// the node at its current position.
    fn align_to_port(
        &mut self,
        preview: &Edge,
        target: &NodeInfo,
        surface: &dyn RenderSurface,
    ) -> Result<Point> {
        let snap = self.snap.check_node_snap_to_preview_lines(&target.id, target.position, [preview], surface)?;
        Ok(match snap.snap_target {
            Some(hit) => {
                trace!("manager::snapped {} onto {} ({:.1})", preview.id, target.id, hit.distance);
                hit.port_position
            }
            None => target.in_port(),
        })
    }

    /// Redraw `edge`, falling back to a fresh visual when the old one is gone.
    fn push_visual(
        &self,
        surface: &dyn RenderSurface,
        edge: &Edge,
    ) -> Result<VisualHandle> {
        let config = EdgeRenderConfig::from_edge(edge);
        if let Some(handle) = self.store.handle(&edge.id) {
            match surface.update_edge(handle, &config) {
                Ok(()) => return Ok(handle.clone()),
                Err(e) => warn!("manager::update of {} failed, redrawing: {}", edge.id, e),
            }
        }
        surface.add_edge(&config)
    }

    fn commit(
        &mut self,
        edge: Edge,
        handle: Option<VisualHandle>,
    ) {
        // geometry the indices refuse only leaves the edge out of spatial queries
        let free_end = edge.free_end.filter(|_| edge.is_preview());
        if free_end.is_none_or(|p| self.endpoints.insert_point(edge.id.clone(), p).is_err()) {
            self.endpoints.remove(&edge.id);
        }
        if edge.bounds().is_none_or(|b| self.regions.insert(edge.id.clone(), b).is_err()) {
            self.regions.remove(&edge.id);
        }
        self.store.insert(edge, handle);
        self.invalidate_caches();
    }

    /// First port slot `edge` would take from another edge. `replacing` is an edge the caller is
    /// about to remove.
    fn slot_conflict(
        &self,
        edge: &Edge,
        replacing: Option<&str>,
    ) -> Option<PolicyViolation> {
        self.store.conflicts(edge).into_iter().find(|(_, holder)| Some(holder.as_str()) != replacing).map(|(slot, edge_id)| PolicyViolation::PortOccupied {
            slot,
            edge_id,
        })
    }

    fn invalidate_caches(&self) {
        self.queries.invalidate_all();
        self.snap.invalidate();
    }
}

fn require_finite(p: Point) -> Result<()> {
    if !(p.x.is_finite() && p.y.is_finite()) {
        return Err(FlowlinesError::InvalidGeometry(format!("({}, {})", p.x, p.y)));
    }
    Ok(())
}
