//! Index-backed queries, memoized until the next mutation.

use crate::{
    gatekeeper::EdgeView,
    manager::EdgeLifecycleManager,
    model::{Edge, EdgeId, Endpoint, NodeId, PortDirection, source_slot_key},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum QueryKey {
    NodePreviews(NodeId),
    NodeConnections(NodeId),
    Outgoing(NodeId),
    Incoming(NodeId),
    Slot(String),
}

#[derive(Debug, Clone)]
pub(crate) enum QueryValue {
    Ids(Vec<EdgeId>),
    Count(usize),
    Flag(bool),
}

impl EdgeLifecycleManager {
    pub fn get_edge(
        &self,
        id: &str,
    ) -> Option<&Edge> {
        self.store.get(id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.store.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.store.len()
    }

    pub fn get_node_preview_lines(
        &self,
        node_id: &str,
    ) -> Vec<&Edge> {
        let ids = self.cached_ids(QueryKey::NodePreviews(node_id.to_string()), || self.store.node_previews(node_id));
        self.resolve(&ids)
    }

    /// Connections leaving or entering `node_id`.
    pub fn get_node_connections(
        &self,
        node_id: &str,
    ) -> Vec<&Edge> {
        let ids = self.cached_ids(QueryKey::NodeConnections(node_id.to_string()), || {
            let mut ids = self.store.node_outgoing(node_id);
            ids.extend(self.store.node_incoming(node_id));
            ids
        });
        self.resolve(&ids)
    }

    pub fn has_preview_line(
        &self,
        node_id: &str,
        branch_id: Option<&str>,
    ) -> bool {
        self.store.preview_for(node_id, branch_id).is_some()
    }

    /// Whether any connection, on any branch, runs from `source_node_id` to `target_node_id`.
    pub fn has_connection(
        &self,
        source_node_id: &str,
        target_node_id: &str,
    ) -> bool {
        self.get_node_connections(source_node_id).iter().any(|e| e.source.node_id == source_node_id && e.target_node() == Some(target_node_id))
    }

    /// Whether the port slot is held by any edge. Outgoing slots are per branch.
    pub fn is_port_occupied(
        &self,
        node_id: &str,
        port_id: &str,
        direction: PortDirection,
        branch_id: Option<&str>,
    ) -> bool {
        let slot = match direction {
            PortDirection::Out => source_slot_key(node_id, port_id, branch_id),
            PortDirection::In => Endpoint::new(node_id, port_id).slot_key(PortDirection::In),
        };
        let key = QueryKey::Slot(slot.clone());
        match self.queries.get_or_insert_with(key, || QueryValue::Flag(self.store.is_slot_occupied(&slot))) {
            QueryValue::Flag(b) => b,
            _ => self.store.is_slot_occupied(&slot),
        }
    }

    pub fn get_node_outgoing_connection_count(
        &self,
        node_id: &str,
    ) -> usize {
        self.cached_count(QueryKey::Outgoing(node_id.to_string()), || self.store.outgoing_connection_count(node_id))
    }

    pub fn get_node_incoming_connection_count(
        &self,
        node_id: &str,
    ) -> usize {
        self.cached_count(QueryKey::Incoming(node_id.to_string()), || self.store.incoming_connection_count(node_id))
    }

    fn cached_ids(
        &self,
        key: QueryKey,
        f: impl FnOnce() -> Vec<EdgeId>,
    ) -> Vec<EdgeId> {
        match self.queries.get(&key) {
            Some(QueryValue::Ids(ids)) => ids,
            _ => {
                let ids = f();
                self.queries.set(key, QueryValue::Ids(ids.clone()));
                ids
            }
        }
    }

    fn cached_count(
        &self,
        key: QueryKey,
        f: impl FnOnce() -> usize,
    ) -> usize {
        match self.queries.get(&key) {
            Some(QueryValue::Count(n)) => n,
            _ => {
                let n = f();
                self.queries.set(key, QueryValue::Count(n));
                n
            }
        }
    }

    fn resolve(
        &self,
        ids: &[EdgeId],
    ) -> Vec<&Edge> {
        ids.iter().filter_map(|id| self.store.get(id)).collect()
    }
}
