//! # Flowlines
//!
//! Flowlines keeps the edges of a node-link flow editor consistent with the graph they are drawn
//! on. It owns every edge the editor shows, from the dashed preview line hanging off a freshly
//! configured node to the committed connection between two ports.
//!
//! ## Core Features
//!
//! - **Edge lifecycle**: preview lines, conversion into connections, removal with preview restore
//! - **Connection policy**: a gatekeeper with pluggable rules decides every new connection
//! - **Snapping**: nearest preview endpoint within a radius while a node is dragged
//! - **Maintenance**: periodic cleanup and diagnosis on a `tokio` runtime
//! - **Notifications**: named events with glob subscriptions and an async broadcast mirror
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowlines::{ConnectionOptions, ManagerBuilder, MemSurface, PreviewOptions};
//!
//! let surface = Arc::new(MemSurface::new());
//! let mut manager = ManagerBuilder::new().surface(surface).build()?;
//!
//! let preview = manager.create_preview_line("n1", PreviewOptions::default())?;
//! let id = preview.edge().unwrap().id.clone();
//! manager.convert_preview_to_connection(&id, "n2", ConnectionOptions::default())?;
//! ```

mod builder;
mod common;
mod config;
mod error;
mod events;
mod gatekeeper;
mod instrument;
mod manager;
mod model;
mod ports;
mod snap;
mod surface;
mod utils;
mod validation;

use std::sync::{Arc, RwLock};

pub use builder::ManagerBuilder;
pub use common::{Batch, BatchHandler, BatchRequest, BatcherStats, BroadcastQueue, MemCache, OperationBatcher, Priority, Shutdown, SpatialIndex, SpatialStats};
pub use config::Config;
pub use error::{FlowlinesError, PolicyViolation};
pub use events::{EdgeEvent, EventBus, EventHandler, RemovalReason, SubscriptionId};
pub use gatekeeper::{
    ConnectionGatekeeper, ConnectionLimit, ConnectionOptions, ConnectionOutcome, ConnectionPlan, ConnectionRequest, CreationMethod, DEFAULT_BATCH_SIZE, EdgeView, PendingClaims,
    GatekeeperStats, NoDuplicate, NoSelfLoop, NodesExist, PortAvailable, PortCompatibility, RuleContext, ValidationRule, default_rules,
};
pub use instrument::{Instrumented, Timing};
pub use manager::{
    CleanupReport, ConfiguredNodeRestore, DiagnosisReport, EdgeLifecycleManager, EdgeOutcome, EdgeStore, FlushReport, InitReport, LimitViolation, MaintenanceMonitor,
    MaintenanceTick, ManagerStats, NeverRestore, PendingOp, PreviewOptions, RemoveOptions, RestorePolicy, SharedManager, SkippedItem,
};
pub use model::*;
pub use ports::*;
pub use snap::{SnapConfig, SnapDetector, SnapHighlight, SnapReason, SnapResult, SnapStats, SnapTarget};
pub use surface::{Cell, EdgeAttrs, EdgeRenderConfig, EdgeRenderData, LineAttrs, MemSurface, Named, RenderSurface, VisualEdge, VisualHandle};
pub use validation::{InvariantViolation, ValidationReport, check_invariants};

/// Result type alias for Flowlines operations.
pub type Result<T> = std::result::Result<T, FlowlinesError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
