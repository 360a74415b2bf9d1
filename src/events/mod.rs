//! Notifications emitted by the edge lifecycle manager.
//!
//! Handlers subscribe with a glob over the event name (`preview:*`, `*`) and run synchronously
//! inside the emitting call. Every event is also mirrored into a broadcast queue for async
//! consumers.

mod bus;
mod edge;

pub use bus::{EventBus, EventHandler, SubscriptionId};
pub use edge::{EdgeEvent, RemovalReason};
