//! Error taxonomy shared by the store, cache, queue and sync components.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The store could not be opened or its connection is unusable.
  #[error("store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("store operation failed: {0}")]
  Store(#[from] rusqlite::Error),

  /// A network fetch failed before any response arrived.
  #[error("network failure: {0}")]
  Network(String),

  /// The remote endpoint rejected or failed a single record.
  #[error("delivery failed: {0}")]
  Delivery(String),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
