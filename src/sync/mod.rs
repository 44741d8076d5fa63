//! Deferred delivery of queued records.
//!
//! - `SyncRegistry` records the intent to sync, at most once per tag
//! - `ConnectivityMonitor` reports when the network comes back
//! - `SyncCoordinator` drains the queue, one independent delivery per record
//! - `RetryPolicy` bounds how often a rejected record is retried

mod coordinator;
mod delivery;
mod monitor;
mod registry;
mod retry;
mod strategy;

pub use coordinator::{DrainReport, SyncCoordinator};
pub use delivery::{Delivery, HttpDelivery};
pub use monitor::{ConnectivityMonitor, NetworkStatus};
pub use registry::SyncRegistry;
pub use retry::RetryPolicy;
pub use strategy::SyncStrategy;
