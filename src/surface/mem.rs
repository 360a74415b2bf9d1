//! In-memory rendering surface for headless use and tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    FlowlinesError, Result, ShareLock,
    model::{NodeId, NodeInfo},
    surface::{Cell, EdgeRenderConfig, RenderSurface, VisualEdge, VisualHandle},
};

#[derive(Clone, Default)]
pub struct MemSurface {
    nodes: ShareLock<HashMap<NodeId, NodeInfo>>,
    edges: ShareLock<BTreeMap<String, VisualEdge>>,
    failing_lookups: Arc<AtomicUsize>,
    failing_writes: Arc<AtomicUsize>,
    add_calls: Arc<AtomicUsize>,
}

impl MemSurface {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            edges: Arc::new(RwLock::new(BTreeMap::new())),
            failing_lookups: Arc::new(AtomicUsize::new(0)),
            failing_writes: Arc::new(AtomicUsize::new(0)),
            add_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add_node(
        &self,
        node: NodeInfo,
    ) {
        self.nodes.write().unwrap().insert(node.id.clone(), node);
    }

    pub fn remove_node(
        &self,
        id: &str,
    ) -> Option<NodeInfo> {
        self.nodes.write().unwrap().remove(id)
    }

    pub fn update_node(
        &self,
        id: &str,
        f: impl FnOnce(&mut NodeInfo),
    ) -> bool {
        match self.nodes.write().unwrap().get_mut(id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        }
    }

    /// Erase a visual behind the manager's back.
    pub fn drop_visual(
        &self,
        id: &str,
    ) -> bool {
        self.edges.write().unwrap().remove(id).is_some()
    }

    /// Insert a raw visual, as if drawn by another part of the host.
    pub fn insert_visual(
        &self,
        edge: VisualEdge,
    ) {
        self.edges.write().unwrap().insert(edge.id.clone(), edge);
    }

    pub fn visual(
        &self,
        id: &str,
    ) -> Option<VisualEdge> {
        self.edges.read().unwrap().get(id).cloned()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.read().unwrap().len()
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` cell lookups fail.
    pub fn fail_next_lookups(
        &self,
        n: usize,
    ) {
        self.failing_lookups.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` draws, updates or removals of visuals fail.
    pub fn fail_next_writes(
        &self,
        n: usize,
    ) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn write_fails(
        &self,
        what: &str,
        id: &str,
    ) -> Result<()> {
        let pending = self.failing_writes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_writes.store(pending - 1, Ordering::SeqCst);
            return Err(FlowlinesError::Surface(format!("{} of {} failed", what, id)));
        }
        Ok(())
    }
}

impl RenderSurface for MemSurface {
    fn add_edge(
        &self,
        config: &EdgeRenderConfig,
    ) -> Result<VisualHandle> {
        self.write_fails("draw", &config.id)?;
        let visual = VisualEdge::from_config(config)?;
        self.edges.write().unwrap().insert(config.id.clone(), visual);
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        Ok(VisualHandle(config.id.clone()))
    }

    fn update_edge(
        &self,
        handle: &VisualHandle,
        config: &EdgeRenderConfig,
    ) -> Result<()> {
        self.write_fails("update", handle.id())?;
        let mut edges = self.edges.write().unwrap();
        if !edges.contains_key(handle.id()) {
            return Err(FlowlinesError::Surface(format!("no visual for {}", handle.id())));
        }
        edges.insert(handle.id().to_string(), VisualEdge::from_config(config)?);
        Ok(())
    }

    fn remove_edge(
        &self,
        handle: &VisualHandle,
    ) -> Result<()> {
        self.write_fails("removal", handle.id())?;
        self.edges.write().unwrap().remove(handle.id());
        Ok(())
    }

    fn get_edges(&self) -> Result<Vec<VisualEdge>> {
        Ok(self.edges.read().unwrap().values().cloned().collect())
    }

    fn get_cell_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Cell>> {
        let pending = self.failing_lookups.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_lookups.store(pending - 1, Ordering::SeqCst);
            return Err(FlowlinesError::Surface(format!("lookup of {} failed", id)));
        }
        if let Some(node) = self.nodes.read().unwrap().get(id) {
            return Ok(Some(Cell::Node(node.clone())));
        }
        Ok(self.edges.read().unwrap().get(id).cloned().map(Cell::Edge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Point, Size};

    #[test]
    fn test_add_and_lookup_edge() {
        let surface = MemSurface::new();
        let cfg = EdgeRenderConfig::from_edge(&Edge::preview("p1", "n1", None));
        let handle = surface.add_edge(&cfg).unwrap();
        assert_eq!(handle.id(), "p1");
        assert!(matches!(surface.get_cell_by_id("p1").unwrap(), Some(Cell::Edge(_))));
        surface.remove_edge(&handle).unwrap();
        assert!(surface.get_cell_by_id("p1").unwrap().is_none());
    }

    #[test]
    fn test_lookup_failure_injection() {
        let surface = MemSurface::new();
        surface.add_node(NodeInfo::new("n1", Point::default(), Size::new(10.0, 10.0)));
        surface.fail_next_lookups(1);
        assert!(surface.get_node("n1").is_err());
        assert!(surface.get_node("n1").unwrap().is_some());
    }

    #[test]
    fn test_update_unknown_visual_fails() {
        let surface = MemSurface::new();
        let cfg = EdgeRenderConfig::from_edge(&Edge::preview("p1", "n1", None));
        assert!(surface.update_edge(&VisualHandle("p1".to_string()), &cfg).is_err());
    }

    #[test]
    fn test_write_failure_injection() {
        let surface = MemSurface::new();
        let cfg = EdgeRenderConfig::from_edge(&Edge::preview("p1", "n1", None));
        surface.fail_next_writes(1);
        assert!(matches!(surface.add_edge(&cfg), Err(FlowlinesError::Surface(_))));
        assert_eq!(surface.edge_count(), 0);
        let handle = surface.add_edge(&cfg).unwrap();
        surface.fail_next_writes(1);
        assert!(surface.remove_edge(&handle).is_err());
        assert_eq!(surface.edge_count(), 1);
    }
}
