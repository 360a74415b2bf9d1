use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::{error, trace};

use crate::{common::Shutdown, manager::SharedManager};

/// Background cleanup and diagnosis loops for a shared manager.
///
/// The manager lock is only ever taken inside a synchronous pass, never across an await.
pub struct MaintenanceMonitor {
    shutdown: Arc<Shutdown>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceMonitor {
    pub fn start(
        manager: SharedManager,
        handle: &Handle,
    ) -> Self {
        let shutdown = Arc::new(Shutdown::new());
        let (auto_cleanup, cleanup_every, diagnose_every) = {
            let m = manager.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let config = m.config();
            (
                config.auto_cleanup,
                Duration::from_millis(config.cleanup_interval_ms.max(1)),
                Duration::from_millis(config.diagnosis_interval_ms.max(1)),
            )
        };

        let mut handles = Vec::new();
        if auto_cleanup {
            handles.push(spawn_pass(handle, manager.clone(), shutdown.clone(), cleanup_every, cleanup_pass));
        }
        handles.push(spawn_pass(handle, manager, shutdown.clone(), diagnose_every, diagnose_pass));

        Self {
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Stop every loop. Passes already running finish first.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_shutdown() && self.handles.lock().unwrap().iter().any(|h| !h.is_finished())
    }
}

impl Drop for MaintenanceMonitor {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

fn spawn_pass(
    handle: &Handle,
    manager: SharedManager,
    shutdown: Arc<Shutdown>,
    period: Duration,
    pass: fn(&SharedManager),
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => pass(&manager),
            }
        }
        trace!("monitor::loop stopped");
    })
}

fn cleanup_pass(manager: &SharedManager) {
    let Ok(mut m) = manager.lock() else {
        error!("monitor::cleanup skipped, manager lock poisoned");
        return;
    };
    if let Err(e) = m.cleanup() {
        error!("monitor::cleanup failed: {}", e);
    }
}

fn diagnose_pass(manager: &SharedManager) {
    let Ok(mut m) = manager.lock() else {
        error!("monitor::diagnose skipped, manager lock poisoned");
        return;
    };
    if let Err(e) = m.diagnose() {
        error!("monitor::diagnose failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Config, EdgeLifecycleManager,
        events::EdgeEvent,
        model::{NodeInfo, Point, Size},
        surface::MemSurface,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_monitor_runs_cleanup_until_shutdown() {
        let config = Config {
            cleanup_interval_ms: 10,
            diagnosis_interval_ms: 10,
            ..Default::default()
        };
        let surface = Arc::new(MemSurface::new());
        surface.add_node(NodeInfo::new("n1", Point::new(0.0, 0.0), Size::new(120.0, 60.0)));
        let mut manager = EdgeLifecycleManager::new(config);
        manager.initialize(surface).unwrap();

        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        manager
            .events()
            .subscribe("cleanup:*", move |e: &EdgeEvent| {
                if matches!(e, EdgeEvent::CleanupCompleted { .. }) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        let shared: SharedManager = Arc::new(Mutex::new(manager));
        let monitor = MaintenanceMonitor::start(shared.clone(), &Handle::current());
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.shutdown();
        assert!(!monitor.is_running());

        assert!(cleanups.load(Ordering::SeqCst) >= 1);
        let stats = shared.lock().unwrap().stats();
        assert!(stats.cleanups >= 1);
        assert!(stats.diagnoses >= 1);
    }
}
