use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::broadcast;
use tracing::trace;

use crate::{Result, ShareLock, common::BroadcastQueue, events::EdgeEvent};

const EVENT_QUEUE_SIZE: usize = 2048;

pub type EventHandler = Arc<dyn Fn(&EdgeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    pattern: globset::GlobMatcher,
    handler: EventHandler,
}

#[derive(Clone)]
pub struct EventBus {
    subscriptions: ShareLock<Vec<Subscription>>,
    queue: Arc<BroadcastQueue<EdgeEvent>>,
    next_id: Arc<AtomicU64>,
    emitted: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            next_id: Arc::new(AtomicU64::new(1)),
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register `f` for every event whose name matches the glob `pattern`.
    pub fn subscribe(
        &self,
        pattern: &str,
        f: impl Fn(&EdgeEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        let matcher = globset::Glob::new(pattern)?.compile_matcher();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.write().unwrap().push(Subscription {
            id,
            pattern: matcher,
            handler: Arc::new(f),
        });
        trace!("events::subscribe({}, {:?})", pattern, id);
        Ok(id)
    }

    pub fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> bool {
        let mut subs = self.subscriptions.write().unwrap();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Deliver `event` to matching handlers, then to async receivers.
    pub fn emit(
        &self,
        event: EdgeEvent,
    ) {
        let name = event.name();
        // handlers may subscribe or emit again, so run them outside the lock
        let matching: Vec<EventHandler> = self.subscriptions.read().unwrap().iter().filter(|s| s.pattern.is_match(name)).map(|s| s.handler.clone()).collect();
        trace!("events::emit({}) -> {} handlers", name, matching.len());
        for handler in matching {
            (handler)(&event);
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        if self.queue.receiver_count() > 0 {
            let _ = self.queue.send(event);
        }
    }

    /// A receiver for every event emitted from now on.
    pub fn receiver(&self) -> broadcast::Receiver<EdgeEvent> {
        self.queue.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().unwrap().len()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::Edge;

    fn created() -> EdgeEvent {
        EdgeEvent::PreviewCreated {
            edge: Edge::preview("p1", "n1", None),
        }
    }

    #[test]
    fn test_glob_subscription_filters_by_name() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe("preview:*", move |e| s.lock().unwrap().push(e.name())).unwrap();

        bus.emit(created());
        bus.emit(EdgeEvent::PerformanceWarning {
            operation: "remove_edge".to_string(),
            elapsed_ms: 20.0,
            threshold_ms: 16.0,
        });
        assert_eq!(*seen.lock().unwrap(), vec!["preview:created"]);
        assert_eq!(bus.emitted(), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = bus.subscribe("*", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        bus.emit(created());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(created());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let bus = EventBus::new();
        assert!(bus.subscribe("preview:[", |_| {}).is_err());
    }

    #[tokio::test]
    async fn test_async_receiver_gets_events() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();
        bus.emit(created());
        let e = rx.recv().await.unwrap();
        assert_eq!(e.name(), "preview:created");
        assert_eq!(e.edge().map(|e| e.id.as_str()), Some("p1"));
    }
}
