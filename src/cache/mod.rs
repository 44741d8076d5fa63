//! Versioned asset cache and fetch interception for offline support.
//!
//! - Responses are stored in named snapshots whose name embeds the version
//! - Exactly one snapshot is current; the rest are evicted on activation
//! - Requests are answered cache-first, then network, then an offline fallback

mod layer;
mod snapshot;
mod storage;
mod types;

pub use layer::FetchInterceptor;
pub use snapshot::WarmReport;
pub use storage::{snapshot_name, CacheStorage};
pub use types::{RequestKey, StoredResponse};
