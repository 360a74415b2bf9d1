//! The authoritative edge collection and its lookup indices.
//!
//! Edges are only ever mutated through [`EdgeStore::update`], which unindexes the edge, applies
//! the change and indexes it again, so the indices can never go stale.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    gatekeeper::EdgeView,
    model::{Edge, EdgeId, EdgeKind, NodeId},
    surface::VisualHandle,
};

/// `(source node, branch)` key of a preview line.
pub(crate) type PreviewKey = (NodeId, Option<String>);

#[derive(Debug, Default)]
pub struct EdgeStore {
    edges: BTreeMap<EdgeId, Edge>,
    handles: HashMap<EdgeId, VisualHandle>,
    previews_by_node: HashMap<NodeId, BTreeSet<EdgeId>>,
    outgoing: HashMap<NodeId, BTreeSet<EdgeId>>,
    incoming: HashMap<NodeId, BTreeSet<EdgeId>>,
    preview_by_key: HashMap<PreviewKey, EdgeId>,
    connection_keys: HashMap<String, EdgeId>,
    port_slots: HashMap<String, EdgeId>,
}

impl EdgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn get(
        &self,
        id: &str,
    ) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.edges.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn ids(&self) -> Vec<EdgeId> {
        self.edges.keys().cloned().collect()
    }

    pub fn count(
        &self,
        kind: EdgeKind,
    ) -> usize {
        self.edges.values().filter(|e| e.kind == kind).count()
    }

    pub fn handle(
        &self,
        id: &str,
    ) -> Option<&VisualHandle> {
        self.handles.get(id)
    }

    pub fn set_handle(
        &mut self,
        id: &str,
        handle: VisualHandle,
    ) {
        if self.edges.contains_key(id) {
            self.handles.insert(id.to_string(), handle);
        }
    }

    /// Slots `edge` would take that another edge already holds, with the holder.
    pub fn conflicts(
        &self,
        edge: &Edge,
    ) -> Vec<(String, EdgeId)> {
        edge.port_slots()
            .into_iter()
            .filter_map(|slot| {
                let holder = self.port_slots.get(&slot).filter(|h| **h != edge.id)?.clone();
                Some((slot, holder))
            })
            .collect()
    }

    /// Add `edge`, replacing a previous edge with the same id.
    pub fn insert(
        &mut self,
        edge: Edge,
        handle: Option<VisualHandle>,
    ) {
        if let Some(old) = self.edges.remove(&edge.id) {
            self.unindex(&old);
        }
        self.index(&edge);
        if let Some(h) = handle {
            self.handles.insert(edge.id.clone(), h);
        }
        self.edges.insert(edge.id.clone(), edge);
    }

    pub fn remove(
        &mut self,
        id: &str,
    ) -> Option<(Edge, Option<VisualHandle>)> {
        let edge = self.edges.remove(id)?;
        self.unindex(&edge);
        Some((edge, self.handles.remove(id)))
    }

    /// Mutate one edge in place, keeping every index in step.
    pub fn update<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut Edge) -> R,
    ) -> Option<R> {
        let mut edge = self.edges.remove(id)?;
        self.unindex(&edge);
        let r = f(&mut edge);
        self.index(&edge);
        self.edges.insert(edge.id.clone(), edge);
        Some(r)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn preview_for(
        &self,
        source_node_id: &str,
        branch_id: Option<&str>,
    ) -> Option<&Edge> {
        let key = (source_node_id.to_string(), branch_id.map(str::to_string));
        self.preview_by_key.get(&key).and_then(|id| self.edges.get(id))
    }

    pub fn node_previews(
        &self,
        node_id: &str,
    ) -> Vec<EdgeId> {
        ids_of(&self.previews_by_node, node_id)
    }

    pub fn node_outgoing(
        &self,
        node_id: &str,
    ) -> Vec<EdgeId> {
        ids_of(&self.outgoing, node_id)
    }

    pub fn node_incoming(
        &self,
        node_id: &str,
    ) -> Vec<EdgeId> {
        ids_of(&self.incoming, node_id)
    }

    /// Every edge touching `node_id`, previews first.
    pub fn node_edges(
        &self,
        node_id: &str,
    ) -> Vec<EdgeId> {
        let mut ids = self.node_previews(node_id);
        ids.extend(self.node_outgoing(node_id));
        ids.extend(self.node_incoming(node_id));
        ids
    }

    pub fn is_slot_occupied(
        &self,
        slot: &str,
    ) -> bool {
        self.port_slots.contains_key(slot)
    }

    fn index(
        &mut self,
        edge: &Edge,
    ) {
        let source = edge.source.node_id.clone();
        match edge.kind {
            EdgeKind::Preview | EdgeKind::Temporary => {
                self.previews_by_node.entry(source.clone()).or_default().insert(edge.id.clone());
                self.preview_by_key.insert((source, edge.branch_id().map(str::to_string)), edge.id.clone());
            }
            EdgeKind::Connection => {
                self.outgoing.entry(source).or_default().insert(edge.id.clone());
                if let Some(target) = edge.target_node() {
                    self.incoming.entry(target.to_string()).or_default().insert(edge.id.clone());
                }
                self.connection_keys.insert(edge.connection_key(), edge.id.clone());
            }
        }
        for slot in edge.port_slots() {
            self.port_slots.insert(slot, edge.id.clone());
        }
    }

    fn unindex(
        &mut self,
        edge: &Edge,
    ) {
        let source = edge.source.node_id.as_str();
        unlink(&mut self.previews_by_node, source, &edge.id);
        unlink(&mut self.outgoing, source, &edge.id);
        if let Some(target) = edge.target_node() {
            unlink(&mut self.incoming, target, &edge.id);
        }
        let key = (edge.source.node_id.clone(), edge.branch_id().map(str::to_string));
        if self.preview_by_key.get(&key) == Some(&edge.id) {
            self.preview_by_key.remove(&key);
        }
        let ckey = edge.connection_key();
        if self.connection_keys.get(&ckey) == Some(&edge.id) {
            self.connection_keys.remove(&ckey);
        }
        for slot in edge.port_slots() {
            if self.port_slots.get(&slot) == Some(&edge.id) {
                self.port_slots.remove(&slot);
            }
        }
    }
}

fn ids_of(
    index: &HashMap<NodeId, BTreeSet<EdgeId>>,
    node_id: &str,
) -> Vec<EdgeId> {
    index.get(node_id).map(|s| s.iter().cloned().collect()).unwrap_or_default()
}

fn unlink(
    index: &mut HashMap<NodeId, BTreeSet<EdgeId>>,
    node_id: &str,
    id: &str,
) {
    if let Some(set) = index.get_mut(node_id) {
        set.remove(id);
        if set.is_empty() {
            index.remove(node_id);
        }
    }
}

impl EdgeView for EdgeStore {
    fn edge(
        &self,
        id: &str,
    ) -> Option<&Edge> {
        self.edges.get(id)
    }

    fn connection_with_key(
        &self,
        key: &str,
    ) -> Option<EdgeId> {
        self.connection_keys.get(key).cloned()
    }

    fn port_occupant(
        &self,
        slot: &str,
    ) -> Option<&Edge> {
        self.port_slots.get(slot).and_then(|id| self.edges.get(id))
    }

    fn outgoing_connection_count(
        &self,
        node_id: &str,
    ) -> usize {
        self.outgoing.get(node_id).map_or(0, |s| s.len())
    }

    fn incoming_connection_count(
        &self,
        node_id: &str,
    ) -> usize {
        self.incoming.get(node_id).map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchInfo, Endpoint};

    #[test]
    fn test_indices_follow_conversion() {
        let mut store = EdgeStore::new();
        store.insert(Edge::preview("p1", "n1", None), None);
        assert_eq!(store.node_previews("n1"), vec!["p1".to_string()]);
        assert!(store.preview_for("n1", None).is_some());
        assert!(store.is_slot_occupied("n1:out:out"));

        store.update("p1", |e| e.convert_to_connection(Endpoint::target("n2"))).unwrap().unwrap();
        assert!(store.node_previews("n1").is_empty());
        assert!(store.preview_for("n1", None).is_none());
        assert_eq!(store.node_outgoing("n1"), vec!["p1".to_string()]);
        assert_eq!(store.incoming_connection_count("n2"), 1);
        assert_eq!(store.connection_with_key("n1-n2-default"), Some("p1".to_string()));
        assert_eq!(store.port_occupant("n2:in:in").map(|e| e.id.as_str()), Some("p1"));
    }

    #[test]
    fn test_remove_clears_every_index() {
        let mut store = EdgeStore::new();
        store.insert(Edge::connection("c1", "n1", "n2", Some(BranchInfo::new("b", "B", 0))), Some(VisualHandle("c1".to_string())));
        let (edge, handle) = store.remove("c1").unwrap();
        assert_eq!(edge.id, "c1");
        assert!(handle.is_some());
        assert!(store.is_empty());
        assert_eq!(store.outgoing_connection_count("n1"), 0);
        assert!(store.connection_with_key("n1-n2-b").is_none());
        assert!(!store.is_slot_occupied("n1:out/b:out"));
        assert!(store.node_edges("n2").is_empty());
    }

    #[test]
    fn test_conflicts_name_the_holder() {
        let mut store = EdgeStore::new();
        store.insert(Edge::connection("c1", "n1", "n2", None), None);
        let other = Edge::connection("c2", "n3", "n2", None);
        assert_eq!(store.conflicts(&other), vec![("n2:in:in".to_string(), "c1".to_string())]);
        assert!(store.conflicts(store.get("c1").unwrap()).is_empty());
    }
}
