//! Frame-scoped operation batching.
//!
//! Small mutation requests arriving within one animation frame are queued by priority and
//! drained as grouped calls, one group per operation kind. A request whose `(kind, key)` is
//! already pending is dropped, so a burst of identical requests collapses into one.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Default number of requests handed to a handler in one call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
/// One frame at 60fps.
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_millis(16);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    fn slot(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// A queued request.
#[derive(Debug, Clone)]
pub struct BatchRequest<T> {
    pub kind: String,
    pub key: String,
    pub priority: Priority,
    pub payload: T,
}

/// A group of requests of one kind, in submission order.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub kind: String,
    pub priority: Priority,
    pub items: Vec<T>,
}

/// Handler registered for one operation kind. Returns how many items it applied.
pub type BatchHandler<T> = Box<dyn FnMut(Vec<T>) -> usize + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub submitted: u64,
    pub deduplicated: u64,
    pub flushed_batches: u64,
    pub flushed_items: u64,
    pub applied_items: u64,
    pub cancelled: u64,
    /// Requests drained for a kind without a registered handler.
    pub unhandled: u64,
}

pub struct OperationBatcher<T> {
    queues: [VecDeque<BatchRequest<T>>; 3],
    pending_keys: HashSet<(String, String)>,
    handlers: HashMap<String, BatchHandler<T>>,
    max_batch_size: usize,
    frame_budget: Duration,
    first_enqueued: Option<Instant>,
    stats: BatcherStats,
}

impl<T> Default for OperationBatcher<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_SIZE)
    }
}

impl<T> OperationBatcher<T> {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            pending_keys: HashSet::new(),
            handlers: HashMap::new(),
            max_batch_size: max_batch_size.max(1),
            frame_budget: DEFAULT_FRAME_BUDGET,
            first_enqueued: None,
            stats: BatcherStats::default(),
        }
    }

    pub fn with_frame_budget(
        mut self,
        budget: Duration,
    ) -> Self {
        self.frame_budget = budget;
        self
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: impl FnMut(Vec<T>) -> usize + Send + 'static,
    ) {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    pub fn unregister(
        &mut self,
        kind: &str,
    ) -> bool {
        self.handlers.remove(kind).is_some()
    }

    /// Queue a request. Returns `false` when an identical `(kind, key)` is already pending.
    pub fn submit(
        &mut self,
        kind: impl Into<String>,
        key: impl Into<String>,
        priority: Priority,
        payload: T,
    ) -> bool {
        let kind = kind.into();
        let key = key.into();
        self.stats.submitted += 1;
        if !self.pending_keys.insert((kind.clone(), key.clone())) {
            self.stats.deduplicated += 1;
            debug!("batcher::submit dropped duplicate {}:{}", kind, key);
            return false;
        }
        self.first_enqueued.get_or_insert_with(Instant::now);
        self.queues[priority.slot()].push_back(BatchRequest {
            kind,
            key,
            priority,
            payload,
        });
        true
    }

    pub fn is_pending(
        &self,
        kind: &str,
        key: &str,
    ) -> bool {
        self.pending_keys.contains(&(kind.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    /// True once the oldest pending request has waited a full frame.
    pub fn is_due(
        &self,
        now: Instant,
    ) -> bool {
        self.first_enqueued.is_some_and(|t| now.duration_since(t) >= self.frame_budget)
    }

    /// Drop everything pending. Returns how many requests were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.len();
        for q in self.queues.iter_mut() {
            q.clear();
        }
        self.pending_keys.clear();
        self.first_enqueued = None;
        self.stats.cancelled += n as u64;
        n
    }

    /// Drain the queues into batches: high before normal before low, grouped by kind in order of
    /// first appearance, each group split into chunks of at most `max_batch_size`.
    pub fn drain(&mut self) -> Vec<Batch<T>> {
        let mut batches = Vec::new();
        for priority in Priority::ALL {
            let queue = std::mem::take(&mut self.queues[priority.slot()]);
            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Vec<T>> = HashMap::new();
            for req in queue {
                if !groups.contains_key(&req.kind) {
                    order.push(req.kind.clone());
                }
                groups.entry(req.kind).or_default().push(req.payload);
            }
            for kind in order {
                let mut items = groups.remove(&kind).unwrap_or_default();
                while !items.is_empty() {
                    let rest = items.split_off(items.len().min(self.max_batch_size));
                    batches.push(Batch {
                        kind: kind.clone(),
                        priority,
                        items,
                    });
                    items = rest;
                }
            }
        }
        self.pending_keys.clear();
        self.first_enqueued = None;
        self.stats.flushed_batches += batches.len() as u64;
        self.stats.flushed_items += batches.iter().map(|b| b.items.len() as u64).sum::<u64>();
        trace!("batcher::drain({} batches)", batches.len());
        batches
    }

    /// Drain and hand each batch to its registered handler. Returns the number of items applied.
    pub fn flush(&mut self) -> usize {
        let mut applied = 0;
        for batch in self.drain() {
            match self.handlers.get_mut(&batch.kind) {
                Some(handler) => applied += handler(batch.items),
                None => {
                    debug!("batcher::flush no handler for {}", batch.kind);
                    self.stats.unhandled += batch.items.len() as u64;
                }
            }
        }
        self.stats.applied_items += applied as u64;
        applied
    }

    /// Drain and hand each batch to `dispatch`, for callers whose handlers need their own state.
    pub fn flush_with(
        &mut self,
        mut dispatch: impl FnMut(&str, Vec<T>) -> usize,
    ) -> usize {
        let mut applied = 0;
        for batch in self.drain() {
            applied += dispatch(&batch.kind, batch.items);
        }
        self.stats.applied_items += applied as u64;
        applied
    }

    pub fn stats(&self) -> BatcherStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_duplicate_keys_are_dropped() {
        let mut b = OperationBatcher::new(10);
        assert!(b.submit("remove", "e1", Priority::Normal, 1));
        assert!(!b.submit("remove", "e1", Priority::High, 2));
        assert!(b.submit("create", "e1", Priority::Normal, 3));
        assert_eq!(b.len(), 2);
        assert_eq!(b.stats().deduplicated, 1);
        assert!(b.is_pending("remove", "e1"));
    }

    #[test]
    fn test_drain_orders_by_priority_then_fifo() {
        let mut b = OperationBatcher::new(10);
        b.submit("remove", "1", Priority::Low, "low");
        b.submit("remove", "2", Priority::Normal, "n1");
        b.submit("remove", "3", Priority::High, "high");
        b.submit("remove", "4", Priority::Normal, "n2");
        let batches = b.drain();
        let flat: Vec<_> = batches.iter().flat_map(|b| b.items.clone()).collect();
        assert_eq!(flat, vec!["high", "n1", "n2", "low"]);
        assert!(b.is_empty());
        assert!(!b.is_pending("remove", "1"));
    }

    #[test]
    fn test_drain_groups_by_kind_and_chunks() {
        let mut b = OperationBatcher::new(2);
        for i in 0..5 {
            b.submit("remove", i.to_string(), Priority::Normal, i);
        }
        b.submit("create", "c", Priority::Normal, 99);
        let batches = b.drain();
        let sizes: Vec<_> = batches.iter().map(|b| (b.kind.as_str(), b.items.len())).collect();
        assert_eq!(sizes, vec![("remove", 2), ("remove", 2), ("remove", 1), ("create", 1)]);
    }

    #[test]
    fn test_flush_calls_registered_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut b = OperationBatcher::new(10);
        let sink = seen.clone();
        b.register("remove", move |items: Vec<u32>| {
            let n = items.len();
            sink.lock().unwrap().push(items);
            n
        });
        b.submit("remove", "a", Priority::Normal, 1);
        b.submit("remove", "b", Priority::Normal, 2);
        b.submit("other", "c", Priority::Normal, 3);
        assert_eq!(b.flush(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2]]);
        assert_eq!(b.stats().unhandled, 1);
        assert_eq!(b.stats().applied_items, 2);
    }

    #[test]
    fn test_cancel_all_clears_queue() {
        let mut b = OperationBatcher::new(10);
        b.submit("remove", "a", Priority::Normal, 1);
        b.submit("remove", "b", Priority::Low, 2);
        assert_eq!(b.cancel_all(), 2);
        assert!(b.is_empty());
        assert_eq!(b.flush_with(|_, items| items.len()), 0);
        assert!(b.submit("remove", "a", Priority::Normal, 1));
    }

    #[test]
    fn test_is_due_after_frame_budget() {
        let mut b = OperationBatcher::new(10).with_frame_budget(Duration::from_millis(5));
        assert!(!b.is_due(Instant::now()));
        b.submit("remove", "a", Priority::Normal, 1);
        assert!(b.is_due(Instant::now() + Duration::from_millis(10)));
    }
}
