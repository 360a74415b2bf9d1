mod batcher;
mod cache;
mod queue;
mod shutdown;
mod spatial;

pub use batcher::{Batch, BatchHandler, BatchRequest, BatcherStats, OperationBatcher, Priority};
pub use cache::MemCache;
pub use queue::BroadcastQueue;
pub use shutdown::Shutdown;
pub use spatial::{SpatialIndex, SpatialStats};
