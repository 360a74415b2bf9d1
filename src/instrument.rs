//! Call timing at the manager boundary.
//!
//! [`Instrumented`] borrows a manager, runs each call through [`Instrumented::run`] and emits
//! `performance:warning` when a call takes at least the configured threshold. The manager itself
//! never measures anything.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use tracing::warn;

use crate::{
    Result,
    events::EdgeEvent,
    gatekeeper::{ConnectionOptions, ConnectionOutcome},
    manager::{CleanupReport, DiagnosisReport, EdgeLifecycleManager, EdgeOutcome, FlushReport, PreviewOptions, RemoveOptions},
    model::{Edge, Point},
    snap::SnapResult,
};

/// Accumulated timings of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub calls: u64,
    pub total: Duration,
    pub max: Duration,
    /// Calls at or above the threshold.
    pub slow: u64,
}

impl Timing {
    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.total / self.calls as u32
    }
}

pub struct Instrumented<'a> {
    manager: &'a mut EdgeLifecycleManager,
    threshold: Duration,
    timings: BTreeMap<&'static str, Timing>,
}

impl<'a> Instrumented<'a> {
    pub fn new(manager: &'a mut EdgeLifecycleManager) -> Self {
        let threshold = manager.config().performance_threshold();
        Self {
            manager,
            threshold,
            timings: BTreeMap::new(),
        }
    }

    pub fn with_threshold(
        mut self,
        threshold: Duration,
    ) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Untimed access to the wrapped manager.
    pub fn manager(&mut self) -> &mut EdgeLifecycleManager {
        &mut *self.manager
    }

    pub fn timing(
        &self,
        operation: &str,
    ) -> Option<&Timing> {
        self.timings.get(operation)
    }

    pub fn timings(&self) -> impl Iterator<Item = (&&'static str, &Timing)> {
        self.timings.iter()
    }

    /// Time `f` against the manager under the name `operation`.
    pub fn run<R>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut EdgeLifecycleManager) -> R,
    ) -> R {
        let start = Instant::now();
        let result = f(&mut *self.manager);
        let elapsed = start.elapsed();

        let timing = self.timings.entry(operation).or_default();
        timing.calls += 1;
        timing.total += elapsed;
        timing.max = timing.max.max(elapsed);
        if elapsed >= self.threshold {
            timing.slow += 1;
            warn!("instrument::{} took {:?}, threshold {:?}", operation, elapsed, self.threshold);
            self.manager.events().emit(EdgeEvent::PerformanceWarning {
                operation: operation.to_string(),
                elapsed_ms: elapsed.as_secs_f64() * 1000.0,
                threshold_ms: self.threshold.as_secs_f64() * 1000.0,
            });
        }
        result
    }

    pub fn create_preview_line(
        &mut self,
        source_node_id: &str,
        options: PreviewOptions,
    ) -> Result<EdgeOutcome> {
        self.run("create_preview_line", |m| m.create_preview_line(source_node_id, options))
    }

    pub fn convert_preview_to_connection(
        &mut self,
        preview_id: &str,
        target_node_id: &str,
        options: ConnectionOptions,
    ) -> Result<ConnectionOutcome> {
        self.run("convert_preview_to_connection", |m| m.convert_preview_to_connection(preview_id, target_node_id, options))
    }

    pub fn create_connection_via_controller(
        &mut self,
        source_node_id: &str,
        target_node_id: &str,
        options: ConnectionOptions,
    ) -> Result<ConnectionOutcome> {
        self.run("create_connection_via_controller", |m| m.create_connection_via_controller(source_node_id, target_node_id, options))
    }

    pub fn remove_edge(
        &mut self,
        id: &str,
        options: RemoveOptions,
    ) -> Result<Option<Edge>> {
        self.run("remove_edge", |m| m.remove_edge(id, options))
    }

    pub fn check_snap(
        &mut self,
        node_id: &str,
        position: Point,
    ) -> Result<SnapResult> {
        self.run("check_snap", |m| m.check_snap(node_id, position))
    }

    pub fn flush_pending(&mut self) -> FlushReport {
        self.run("flush_pending", |m| m.flush_pending())
    }

    pub fn cleanup(&mut self) -> Result<CleanupReport> {
        self.run("cleanup", |m| m.cleanup())
    }

    pub fn diagnose(&mut self) -> Result<DiagnosisReport> {
        self.run("diagnose", |m| m.diagnose())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        Config,
        model::{NodeInfo, Size},
        surface::MemSurface,
    };

    fn manager() -> EdgeLifecycleManager {
        let surface = MemSurface::new();
        surface.add_node(NodeInfo::new("n1", Point::new(0.0, 0.0), Size::new(120.0, 60.0)));
        let mut manager = EdgeLifecycleManager::new(Config::default());
        manager.initialize(Arc::new(surface)).unwrap();
        manager
    }

    #[test]
    fn test_slow_calls_emit_warning() {
        let mut manager = manager();
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        manager
            .events()
            .subscribe("performance:*", move |e: &EdgeEvent| {
                if let EdgeEvent::PerformanceWarning {
                    operation,
                    ..
                } = e
                {
                    sink.lock().unwrap().push(operation.clone());
                }
            })
            .unwrap();

        let mut timed = Instrumented::new(&mut manager).with_threshold(Duration::ZERO);
        assert!(timed.create_preview_line("n1", PreviewOptions::default()).unwrap().is_created());
        timed.cleanup().unwrap();

        let t = timed.timing("create_preview_line").unwrap();
        assert_eq!(t.calls, 1);
        assert_eq!(t.slow, 1);
        assert_eq!(timed.timings().count(), 2);
        assert_eq!(*warnings.lock().unwrap(), vec!["create_preview_line", "cleanup"]);
    }

    #[test]
    fn test_fast_calls_stay_quiet() {
        let mut manager = manager();
        let mut timed = Instrumented::new(&mut manager).with_threshold(Duration::from_secs(60));
        timed.check_snap("n1", Point::new(0.0, 0.0)).unwrap();
        timed.check_snap("n1", Point::new(5.0, 0.0)).unwrap();
        let t = timed.timing("check_snap").unwrap();
        assert_eq!(t.calls, 2);
        assert_eq!(t.slow, 0);
        assert!(t.max >= t.average());
        assert_eq!(timed.manager().events().emitted(), 1);
    }
}
