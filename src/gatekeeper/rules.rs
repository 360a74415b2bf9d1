//! Validation rules run by the gatekeeper before a connection is approved.

use std::collections::{HashMap, HashSet};

use crate::{
    PolicyViolation,
    gatekeeper::{ConnectionPlan, EdgeView},
    model::{EdgeId, NodeInfo, connection_key, source_slot_key, target_slot_key},
    ports::{PortConfiguration, PortContract},
};

/// Keys, slots and per-node counts claimed by earlier approvals in the same batch.
#[derive(Debug, Clone, Default)]
pub struct PendingClaims {
    keys: HashSet<String>,
    slots: HashSet<String>,
    outgoing: HashMap<String, usize>,
    incoming: HashMap<String, usize>,
}

impl PendingClaims {
    pub fn claim(
        &mut self,
        plan: &ConnectionPlan,
    ) {
        let branch = plan.branch.as_ref().map(|b| b.id.as_str());
        self.keys.insert(connection_key(&plan.source_node_id, Some(&plan.target_node_id), branch));
        self.slots.insert(source_slot_key(&plan.source_node_id, &plan.ports.source.port, branch));
        self.slots.insert(target_slot_key(&plan.target_node_id, &plan.ports.target.port));
        *self.outgoing.entry(plan.source_node_id.clone()).or_default() += 1;
        *self.incoming.entry(plan.target_node_id.clone()).or_default() += 1;
    }

    pub fn has_key(
        &self,
        key: &str,
    ) -> bool {
        self.keys.contains(key)
    }

    pub fn has_slot(
        &self,
        slot: &str,
    ) -> bool {
        self.slots.contains(slot)
    }

    pub fn outgoing(
        &self,
        node_id: &str,
    ) -> usize {
        self.outgoing.get(node_id).copied().unwrap_or(0)
    }

    pub fn incoming(
        &self,
        node_id: &str,
    ) -> usize {
        self.incoming.get(node_id).copied().unwrap_or(0)
    }
}

/// Everything a rule may look at.
pub struct RuleContext<'a> {
    pub source_node_id: &'a str,
    pub target_node_id: &'a str,
    pub branch_id: Option<&'a str>,
    /// Set on the preview conversion path.
    pub preview_id: Option<&'a str>,
    pub source_node: Option<&'a NodeInfo>,
    pub target_node: Option<&'a NodeInfo>,
    pub port_config: &'a PortConfiguration,
    pub view: &'a dyn EdgeView,
    pub ports: &'a PortContract,
    pub max_connections_per_node: Option<usize>,
    pub pending: &'a PendingClaims,
}

impl RuleContext<'_> {
    pub fn connection_key(&self) -> String {
        connection_key(self.source_node_id, Some(self.target_node_id), self.branch_id)
    }

    pub fn source_slot(&self) -> String {
        source_slot_key(self.source_node_id, &self.port_config.source.port, self.branch_id)
    }

    pub fn target_slot(&self) -> String {
        target_slot_key(self.target_node_id, &self.port_config.target.port)
    }
}

/// One step of the approval chain. Returning a violation stops the chain.
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn check(
        &self,
        ctx: &RuleContext<'_>,
    ) -> Option<PolicyViolation>;
}

/// Both nodes must exist on the surface.
pub struct NodesExist;

impl ValidationRule for NodesExist {
    fn name(&self) -> &str {
        "existence"
    }

    fn check(
        &self,
        ctx: &RuleContext<'_>,
    ) -> Option<PolicyViolation> {
        if ctx.source_node.is_none() {
            return Some(PolicyViolation::MissingNode {
                node_id: ctx.source_node_id.to_string(),
            });
        }
        if ctx.target_node.is_none() {
            return Some(PolicyViolation::MissingNode {
                node_id: ctx.target_node_id.to_string(),
            });
        }
        None
    }
}

pub struct NoSelfLoop;

impl ValidationRule for NoSelfLoop {
    fn name(&self) -> &str {
        "self-loop"
    }

    fn check(
        &self,
        ctx: &RuleContext<'_>,
    ) -> Option<PolicyViolation> {
        (ctx.source_node_id == ctx.target_node_id).then(|| PolicyViolation::SelfLoop {
            node_id: ctx.source_node_id.to_string(),
        })
    }
}

/// No other connection may share the connection key.
pub struct NoDuplicate;

impl ValidationRule for NoDuplicate {
    fn name(&self) -> &str {
        "no-duplicate"
    }

    fn check(
        &self,
        ctx: &RuleContext<'_>,
    ) -> Option<PolicyViolation> {
        let key = ctx.connection_key();
        let existing = ctx.view.connection_with_key(&key).filter(|id| Some(id.as_str()) != ctx.preview_id);
        if existing.is_some() || ctx.pending.has_key(&key) {
            return Some(PolicyViolation::DuplicateConnection {
                key,
            });
        }
        None
    }
}

/// The source slot must be free (or held by the preview being converted, or by a preview the
/// new connection replaces) and the planned target slot must be free.
pub struct PortAvailable;

impl ValidationRule for PortAvailable {
    fn name(&self) -> &str {
        "port-availability"
    }

    fn check(
        &self,
        ctx: &RuleContext<'_>,
    ) -> Option<PolicyViolation> {
        let source_slot = ctx.source_slot();
        if let Some(edge) = ctx.view.port_occupant(&source_slot) {
            let replaceable = Some(edge.id.as_str()) == ctx.preview_id || (ctx.preview_id.is_none() && edge.is_preview());
            if !replaceable {
                return Some(occupied(source_slot, edge.id.clone()));
            }
        }
        let target_slot = ctx.target_slot();
        if let Some(edge) = ctx.view.port_occupant(&target_slot) {
            return Some(occupied(target_slot, edge.id.clone()));
        }
        for slot in [source_slot, target_slot] {
            if ctx.pending.has_slot(&slot) {
                return Some(occupied(slot, "pending".to_string()));
            }
        }
        None
    }
}

fn occupied(
    slot: String,
    edge_id: EdgeId,
) -> PolicyViolation {
    PolicyViolation::PortOccupied {
        slot,
        edge_id,
    }
}

/// Per-node ceiling on outgoing and incoming connections.
pub struct ConnectionLimit;

impl ValidationRule for ConnectionLimit {
    fn name(&self) -> &str {
        "connection-limit"
    }

    fn check(
        &self,
        ctx: &RuleContext<'_>,
    ) -> Option<PolicyViolation> {
        let limit = ctx.max_connections_per_node?;
        if ctx.view.outgoing_connection_count(ctx.source_node_id) + ctx.pending.outgoing(ctx.source_node_id) >= limit {
            return Some(PolicyViolation::ConnectionLimit {
                node_id: ctx.source_node_id.to_string(),
                limit,
            });
        }
        if ctx.view.incoming_connection_count(ctx.target_node_id) + ctx.pending.incoming(ctx.target_node_id) >= limit {
            return Some(PolicyViolation::ConnectionLimit {
                node_id: ctx.target_node_id.to_string(),
                limit,
            });
        }
        None
    }
}

/// Both nodes must expose the canonical ports.
pub struct PortCompatibility;

impl ValidationRule for PortCompatibility {
    fn name(&self) -> &str {
        "port-compatibility"
    }

    fn check(
        &self,
        ctx: &RuleContext<'_>,
    ) -> Option<PolicyViolation> {
        let report = ctx.ports.validate_port_configuration(ctx.port_config);
        if let Some(v) = report.errors.into_iter().find(|v| matches!(v, PolicyViolation::PortIncompatible { .. })) {
            if ctx.ports.is_strict() {
                return Some(v);
            }
        }
        let (source, target) = (ctx.source_node?, ctx.target_node?);
        let compat = ctx.ports.validate_node_port_compatibility(source, target);
        (!compat.is_valid).then(|| PolicyViolation::PortIncompatible {
            reason: compat.errors.join("; "),
        })
    }
}

/// The chain installed by default, in evaluation order.
pub fn default_rules() -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(NodesExist),
        Box::new(NoSelfLoop),
        Box::new(NoDuplicate),
        Box::new(PortAvailable),
        Box::new(PortCompatibility),
        Box::new(ConnectionLimit),
    ]
}
