//! Connection creation gatekeeper.
//!
//! Connections are created by converting a preview line. The gatekeeper resolves the preview,
//! builds the port pair, runs the validation chain and hands back a [`ConnectionPlan`] describing
//! the approved edge; it owns no storage. Direct creation between two nodes is refused unless it
//! has been unlocked.

mod rules;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    FlowlinesError, PolicyViolation, Result,
    model::{BranchInfo, Edge, EdgeId, NodeId},
    ports::{PortConfiguration, PortContract, PortOptions},
    surface::RenderSurface,
    utils,
};

pub use rules::{ConnectionLimit, NoDuplicate, NoSelfLoop, NodesExist, PendingClaims, PortAvailable, PortCompatibility, RuleContext, ValidationRule, default_rules};

/// Default size of the groups a batch is split into.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Read-only view over the edge collection.
pub trait EdgeView {
    fn edge(
        &self,
        id: &str,
    ) -> Option<&Edge>;

    /// Id of the connection holding `key`, if any.
    fn connection_with_key(
        &self,
        key: &str,
    ) -> Option<EdgeId>;

    /// Edge occupying a port slot.
    fn port_occupant(
        &self,
        slot: &str,
    ) -> Option<&Edge>;

    fn outgoing_connection_count(
        &self,
        node_id: &str,
    ) -> usize;

    fn incoming_connection_count(
        &self,
        node_id: &str,
    ) -> usize;
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Branch for direct creation; the preview's branch is used on the conversion path.
    pub branch: Option<BranchInfo>,
    pub source_port: Option<String>,
    pub target_port: Option<String>,
    pub created_by: Option<String>,
}

impl ConnectionOptions {
    fn port_options(
        &self,
        branch_id: Option<&str>,
    ) -> PortOptions {
        PortOptions {
            source_port: self.source_port.clone(),
            target_port: self.target_port.clone(),
            branch_id: branch_id.map(str::to_string),
            created_by: self.created_by.clone(),
            strict: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionRequest {
    /// The sanctioned path.
    FromPreviewLine {
        preview_line_id: EdgeId,
        target_node_id: NodeId,
        options: ConnectionOptions,
    },
    /// Blocked unless direct creation is unlocked.
    Direct {
        source_node_id: NodeId,
        target_node_id: NodeId,
        options: ConnectionOptions,
    },
}

impl ConnectionRequest {
    pub fn from_preview(
        preview_line_id: impl Into<EdgeId>,
        target_node_id: impl Into<NodeId>,
    ) -> Self {
        Self::FromPreviewLine {
            preview_line_id: preview_line_id.into(),
            target_node_id: target_node_id.into(),
            options: ConnectionOptions::default(),
        }
    }

    pub fn direct(
        source_node_id: impl Into<NodeId>,
        target_node_id: impl Into<NodeId>,
    ) -> Self {
        Self::Direct {
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            options: ConnectionOptions::default(),
        }
    }

    pub fn with_options(
        mut self,
        opts: ConnectionOptions,
    ) -> Self {
        match &mut self {
            Self::FromPreviewLine {
                options, ..
            }
            | Self::Direct {
                options, ..
            } => *options = opts,
        }
        self
    }

    pub fn method(&self) -> CreationMethod {
        match self {
            Self::FromPreviewLine {
                ..
            } => CreationMethod::PreviewConversion,
            Self::Direct {
                ..
            } => CreationMethod::Direct,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CreationMethod {
    PreviewConversion,
    Direct,
}

/// The approved edge, for the caller to apply.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionPlan {
    pub connection_id: EdgeId,
    pub preview_line_id: Option<EdgeId>,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub branch: Option<BranchInfo>,
    pub ports: PortConfiguration,
}

/// `{success, method, connectionId?, error?, blocked?}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionOutcome {
    pub success: bool,
    pub method: CreationMethod,
    pub connection_id: Option<EdgeId>,
    pub error: Option<PolicyViolation>,
    pub blocked: bool,
    pub plan: Option<ConnectionPlan>,
    /// The stored edge, filled in by the manager after applying the plan.
    pub edge: Option<Edge>,
}

impl ConnectionOutcome {
    fn approved(
        method: CreationMethod,
        plan: ConnectionPlan,
    ) -> Self {
        Self {
            success: true,
            method,
            connection_id: Some(plan.connection_id.clone()),
            error: None,
            blocked: false,
            plan: Some(plan),
            edge: None,
        }
    }

    pub fn rejected(
        method: CreationMethod,
        violation: PolicyViolation,
    ) -> Self {
        Self {
            success: false,
            method,
            connection_id: None,
            error: Some(violation),
            blocked: false,
            plan: None,
            edge: None,
        }
    }

    fn blocked(method: CreationMethod) -> Self {
        Self {
            blocked: true,
            ..Self::rejected(method, PolicyViolation::DirectCreationBlocked)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatekeeperStats {
    pub attempts: u64,
    pub approved: u64,
    pub blocked: u64,
    pub rejected: u64,
}

pub struct ConnectionGatekeeper {
    ports: Arc<PortContract>,
    rules: Vec<Box<dyn ValidationRule>>,
    allow_direct_creation: bool,
    max_connections_per_node: Option<usize>,
    batch_size: usize,
    stats: GatekeeperStats,
}

impl ConnectionGatekeeper {
    pub fn new(ports: Arc<PortContract>) -> Self {
        Self {
            ports,
            rules: default_rules(),
            allow_direct_creation: false,
            max_connections_per_node: None,
            batch_size: DEFAULT_BATCH_SIZE,
            stats: GatekeeperStats::default(),
        }
    }

    pub fn allow_direct_creation(
        mut self,
        allow: bool,
    ) -> Self {
        self.allow_direct_creation = allow;
        self
    }

    pub fn max_connections_per_node(
        mut self,
        limit: Option<usize>,
    ) -> Self {
        self.max_connections_per_node = limit;
        self
    }

    pub fn batch_size(
        mut self,
        size: usize,
    ) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn unlock_direct_creation(&mut self) {
        self.allow_direct_creation = true;
    }

    pub fn lock_direct_creation(&mut self) {
        self.allow_direct_creation = false;
    }

    pub fn is_direct_creation_allowed(&self) -> bool {
        self.allow_direct_creation
    }

    /// Append a rule to the end of the chain.
    pub fn add_rule(
        &mut self,
        rule: Box<dyn ValidationRule>,
    ) {
        self.rules.push(rule);
    }

    /// Drop a rule by name. Returns whether one was removed.
    pub fn remove_rule(
        &mut self,
        name: &str,
    ) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name() != name);
        before != self.rules.len()
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn stats(&self) -> GatekeeperStats {
        self.stats
    }

    /// Decide on one request. Policy rejections come back as an unsuccessful outcome; only
    /// malformed requests (missing ids, non-canonical ports in strict mode) and surface failures
    /// are errors.
    pub fn create_connection(
        &mut self,
        request: &ConnectionRequest,
        view: &dyn EdgeView,
        surface: &dyn RenderSurface,
    ) -> Result<ConnectionOutcome> {
        self.decide(request, view, surface, &PendingClaims::default())
    }

    /// Decide on many requests. They are processed in groups of `batch_size`; a failing request
    /// does not affect the others, but later requests see the keys, slots and connection counts
    /// claimed by earlier approvals in the same batch.
    pub fn create_connections(
        &mut self,
        requests: &[ConnectionRequest],
        view: &dyn EdgeView,
        surface: &dyn RenderSurface,
    ) -> Vec<Result<ConnectionOutcome>> {
        let mut pending = PendingClaims::default();
        let mut results = Vec::with_capacity(requests.len());
        for (n, group) in requests.chunks(self.batch_size).enumerate() {
            trace!("gatekeeper::create_connections(group {}, {} requests)", n, group.len());
            for request in group {
                let result = self.decide(request, view, surface, &pending);
                if let Ok(ConnectionOutcome {
                    plan: Some(plan),
                    ..
                }) = &result
                {
                    pending.claim(plan);
                }
                results.push(result);
            }
        }
        results
    }

    fn decide(
        &mut self,
        request: &ConnectionRequest,
        view: &dyn EdgeView,
        surface: &dyn RenderSurface,
        pending: &PendingClaims,
    ) -> Result<ConnectionOutcome> {
        self.stats.attempts += 1;
        let method = request.method();

        let (source_node_id, target_node_id, preview_id, branch, options) = match request {
            ConnectionRequest::FromPreviewLine {
                preview_line_id,
                target_node_id,
                options,
            } => {
                require(preview_line_id, "preview line id")?;
                require(target_node_id, "target node id")?;
                let Some(preview) = view.edge(preview_line_id) else {
                    return Ok(self.reject(
                        method,
                        PolicyViolation::MissingPreview {
                            edge_id: preview_line_id.clone(),
                        },
                    ));
                };
                if !preview.is_preview() {
                    return Ok(self.reject(
                        method,
                        PolicyViolation::NotAPreview {
                            edge_id: preview_line_id.clone(),
                        },
                    ));
                }
                (preview.source.node_id.clone(), target_node_id.clone(), Some(preview_line_id.clone()), preview.branch.clone(), options)
            }
            ConnectionRequest::Direct {
                source_node_id,
                target_node_id,
                options,
            } => {
                require(source_node_id, "source node id")?;
                require(target_node_id, "target node id")?;
                if !self.allow_direct_creation {
                    debug!("gatekeeper::blocked direct creation {} -> {}", source_node_id, target_node_id);
                    self.stats.blocked += 1;
                    return Ok(ConnectionOutcome::blocked(method));
                }
                (source_node_id.clone(), target_node_id.clone(), None, options.branch.clone(), options)
            }
        };

        let branch_id = branch.as_ref().map(|b| b.id.as_str());
        let port_config = self.ports.create_port_configuration(&source_node_id, &target_node_id, &options.port_options(branch_id))?;
        let source_node = surface.get_node(&source_node_id)?;
        let target_node = surface.get_node(&target_node_id)?;

        let ctx = RuleContext {
            source_node_id: &source_node_id,
            target_node_id: &target_node_id,
            branch_id,
            preview_id: preview_id.as_deref(),
            source_node: source_node.as_ref(),
            target_node: target_node.as_ref(),
            port_config: &port_config,
            view,
            ports: &self.ports,
            max_connections_per_node: self.max_connections_per_node,
            pending,
        };
        let violation = self.rules.iter().find_map(|rule| {
            let v = rule.check(&ctx);
            if let Some(v) = &v {
                debug!("gatekeeper::rule {} rejected {} -> {}: {}", rule.name(), source_node_id, target_node_id, v);
            }
            v
        });
        if let Some(v) = violation {
            return Ok(self.reject(method, v));
        }

        let plan = ConnectionPlan {
            connection_id: preview_id.clone().unwrap_or_else(utils::longid),
            preview_line_id: preview_id,
            source_node_id,
            target_node_id,
            branch,
            ports: port_config,
        };
        self.stats.approved += 1;
        trace!("gatekeeper::approved {}", plan.connection_id);
        Ok(ConnectionOutcome::approved(method, plan))
    }

    fn reject(
        &mut self,
        method: CreationMethod,
        violation: PolicyViolation,
    ) -> ConnectionOutcome {
        self.stats.rejected += 1;
        ConnectionOutcome::rejected(method, violation)
    }
}

fn require(
    id: &str,
    what: &str,
) -> Result<()> {
    if id.is_empty() {
        return Err(FlowlinesError::MissingId(what.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{NodeInfo, Point, Size},
        surface::MemSurface,
    };

    #[derive(Default)]
    struct Edges(Vec<Edge>);

    impl EdgeView for Edges {
        fn edge(
            &self,
            id: &str,
        ) -> Option<&Edge> {
            self.0.iter().find(|e| e.id == id)
        }

        fn connection_with_key(
            &self,
            key: &str,
        ) -> Option<EdgeId> {
            self.0.iter().find(|e| e.is_connection() && e.connection_key() == key).map(|e| e.id.clone())
        }

        fn port_occupant(
            &self,
            slot: &str,
        ) -> Option<&Edge> {
            self.0.iter().find(|e| e.port_slots().iter().any(|s| s == slot))
        }

        fn outgoing_connection_count(
            &self,
            node_id: &str,
        ) -> usize {
            self.0.iter().filter(|e| e.is_connection() && e.source.node_id == node_id).count()
        }

        fn incoming_connection_count(
            &self,
            node_id: &str,
        ) -> usize {
            self.0.iter().filter(|e| e.target_node() == Some(node_id)).count()
        }
    }

    fn surface(ids: &[&str]) -> MemSurface {
        let s = MemSurface::new();
        for (i, id) in ids.iter().enumerate() {
            s.add_node(NodeInfo::new(*id, Point::new(0.0, i as f64 * 200.0), Size::new(120.0, 60.0)));
        }
        s
    }

    fn gatekeeper() -> ConnectionGatekeeper {
        ConnectionGatekeeper::new(Arc::new(PortContract::default()))
    }

    #[test]
    fn test_direct_creation_blocked_by_default() {
        let mut gk = gatekeeper();
        let out = gk.create_connection(&ConnectionRequest::direct("a", "b"), &Edges::default(), &surface(&["a", "b"])).unwrap();
        assert!(!out.success);
        assert!(out.blocked);
        assert_eq!(out.error, Some(PolicyViolation::DirectCreationBlocked));
        assert_eq!(gk.stats().blocked, 1);
    }

    #[test]
    fn test_unlocked_direct_creation_produces_plan() {
        let mut gk = gatekeeper();
        gk.unlock_direct_creation();
        let out = gk.create_connection(&ConnectionRequest::direct("a", "b"), &Edges::default(), &surface(&["a", "b"])).unwrap();
        assert!(out.success);
        assert_eq!(out.method, CreationMethod::Direct);
        let plan = out.plan.unwrap();
        assert_eq!(plan.ports.source.port, "out");
        assert_eq!(plan.ports.target.port, "in");
        assert!(plan.preview_line_id.is_none());

        gk.lock_direct_creation();
        assert!(!gk.is_direct_creation_allowed());
    }

    #[test]
    fn test_conversion_reuses_preview_id() {
        let mut gk = gatekeeper();
        let view = Edges(vec![Edge::preview("p1", "a", None)]);
        let out = gk.create_connection(&ConnectionRequest::from_preview("p1", "b"), &view, &surface(&["a", "b"])).unwrap();
        assert!(out.success);
        assert_eq!(out.connection_id.as_deref(), Some("p1"));
        assert_eq!(out.method, CreationMethod::PreviewConversion);
    }

    #[test]
    fn test_conversion_rejections() {
        let mut gk = gatekeeper();
        let s = surface(&["a", "b"]);
        let view = Edges(vec![Edge::preview("p1", "a", None), Edge::connection("c1", "b", "a", None)]);

        let missing = gk.create_connection(&ConnectionRequest::from_preview("nope", "b"), &view, &s).unwrap();
        assert!(matches!(missing.error, Some(PolicyViolation::MissingPreview { .. })));

        let not_preview = gk.create_connection(&ConnectionRequest::from_preview("c1", "b"), &view, &s).unwrap();
        assert!(matches!(not_preview.error, Some(PolicyViolation::NotAPreview { .. })));

        let self_loop = gk.create_connection(&ConnectionRequest::from_preview("p1", "a"), &view, &s).unwrap();
        assert!(matches!(self_loop.error, Some(PolicyViolation::SelfLoop { .. })));

        let no_node = gk.create_connection(&ConnectionRequest::from_preview("p1", "ghost"), &view, &s).unwrap();
        assert_eq!(
            no_node.error,
            Some(PolicyViolation::MissingNode {
                node_id: "ghost".to_string(),
            })
        );
        assert_eq!(gk.stats().rejected, 4);
    }

    #[test]
    fn test_duplicate_and_occupied_target() {
        let mut gk = gatekeeper();
        let s = surface(&["a", "b", "c"]);
        let view = Edges(vec![Edge::connection("c1", "a", "b", None), Edge::preview("p2", "c", None)]);
        let dup = gk.create_connection(&ConnectionRequest::from_preview("p2", "b"), &view, &s).unwrap();
        assert!(matches!(dup.error, Some(PolicyViolation::PortOccupied { ref slot, .. }) if slot == "b:in:in"));

        gk.unlock_direct_creation();
        let again = gk.create_connection(&ConnectionRequest::direct("a", "b"), &view, &s).unwrap();
        assert_eq!(
            again.error,
            Some(PolicyViolation::DuplicateConnection {
                key: "a-b-default".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_ids_are_errors() {
        let mut gk = gatekeeper();
        let err = gk.create_connection(&ConnectionRequest::from_preview("", "b"), &Edges::default(), &surface(&[])).unwrap_err();
        assert_eq!(err, FlowlinesError::MissingId("preview line id".to_string()));
    }

    #[test]
    fn test_batch_sees_earlier_approvals() {
        let mut gk = gatekeeper().allow_direct_creation(true).batch_size(1);
        let s = surface(&["a", "b", "c"]);
        let requests = vec![ConnectionRequest::direct("a", "b"), ConnectionRequest::direct("c", "b"), ConnectionRequest::direct("a", "c")];
        let results = gk.create_connections(&requests, &Edges::default(), &s);
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().success);
        assert!(matches!(results[1].as_ref().unwrap().error, Some(PolicyViolation::PortOccupied { .. })));
        // a's plain out slot is already claimed by a -> b
        assert!(!results[2].as_ref().unwrap().success);
    }

    #[test]
    fn test_connection_limit() {
        let mut gk = gatekeeper().allow_direct_creation(true).max_connections_per_node(Some(1));
        let s = surface(&["a", "b", "c"]);
        let branch = BranchInfo::new("x", "X", 1);
        let view = Edges(vec![Edge::connection("c1", "a", "b", None)]);
        let req = ConnectionRequest::direct("a", "c").with_options(ConnectionOptions {
            branch: Some(branch),
            ..Default::default()
        });
        let out = gk.create_connection(&req, &view, &s).unwrap();
        assert!(matches!(out.error, Some(PolicyViolation::ConnectionLimit { limit: 1, .. })));
    }

    #[test]
    fn test_batch_counts_pending_toward_limit() {
        let mut gk = gatekeeper().allow_direct_creation(true).max_connections_per_node(Some(1));
        let s = surface(&["a", "b", "c"]);
        let on = |target: &str, branch: &str| {
            ConnectionRequest::direct("a", target).with_options(ConnectionOptions {
                branch: Some(BranchInfo::new(branch, branch, 0)),
                ..Default::default()
            })
        };
        let results = gk.create_connections(&[on("b", "x"), on("c", "y")], &Edges::default(), &s);
        assert!(results[0].as_ref().unwrap().success);
        assert_eq!(
            results[1].as_ref().unwrap().error,
            Some(PolicyViolation::ConnectionLimit {
                node_id: "a".to_string(),
                limit: 1,
            })
        );
    }

    #[test]
    fn test_custom_target_port_is_exclusive() {
        let mut gk = ConnectionGatekeeper::new(Arc::new(PortContract::new(false))).allow_direct_creation(true);
        let s = surface(&["a", "b", "c"]);
        let mut held = Edge::connection("c1", "a", "b", None);
        held.target.as_mut().unwrap().port_id = "left".to_string();
        let view = Edges(vec![held]);
        let left = ConnectionOptions {
            target_port: Some("left".to_string()),
            ..Default::default()
        };

        let out = gk.create_connection(&ConnectionRequest::direct("c", "b").with_options(left.clone()), &view, &s).unwrap();
        assert_eq!(
            out.error,
            Some(PolicyViolation::PortOccupied {
                slot: "b:left:in".to_string(),
                edge_id: "c1".to_string(),
            })
        );
        // the canonical slot of b is still free
        assert!(gk.create_connection(&ConnectionRequest::direct("c", "b"), &view, &s).unwrap().success);

        let batch = [ConnectionRequest::direct("c", "a").with_options(left.clone()), ConnectionRequest::direct("b", "a").with_options(left)];
        let results = gk.create_connections(&batch, &Edges::default(), &s);
        assert!(results[0].as_ref().unwrap().success);
        assert!(matches!(&results[1].as_ref().unwrap().error, Some(PolicyViolation::PortOccupied { slot, .. }) if slot == "a:left:in"));
    }

    struct DenyAll;

    impl ValidationRule for DenyAll {
        fn name(&self) -> &str {
            "deny-all"
        }

        fn check(
            &self,
            _ctx: &RuleContext<'_>,
        ) -> Option<PolicyViolation> {
            Some(PolicyViolation::Custom {
                message: "denied".to_string(),
            })
        }
    }

    #[test]
    fn test_custom_rules() {
        let mut gk = gatekeeper();
        gk.add_rule(Box::new(DenyAll));
        assert_eq!(gk.rule_names().last(), Some(&"deny-all"));
        let view = Edges(vec![Edge::preview("p1", "a", None)]);
        let s = surface(&["a", "b"]);
        let out = gk.create_connection(&ConnectionRequest::from_preview("p1", "b"), &view, &s).unwrap();
        assert_eq!(out.error.map(|e| e.to_string()), Some("denied".to_string()));
        assert!(gk.remove_rule("deny-all"));
        assert!(gk.create_connection(&ConnectionRequest::from_preview("p1", "b"), &view, &s).unwrap().success);
    }
}
