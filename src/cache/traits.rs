//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::key::ResourceName;

/// Trait for entities that can be cached.
///
/// The identifier is deliberately not part of this trait: each
/// [`EntityService`](crate::api::EntityService) is given an explicit id
/// extractor when it is built.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Resource name the entity is cached under (e.g. "students", "feePayments")
  fn resource() -> ResourceName;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the backend
  pub fetched_at: DateTime<Utc>,
  /// Version of the cache entry the data was read from. `None` when the
  /// result was never stored (cache disabled, or the entry was invalidated
  /// while the request was in flight).
  pub version: Option<u64>,
}

impl<T> CacheResult<T> {
  /// Convert the payload, keeping the metadata.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      fetched_at: self.fetched_at,
      version: self.version,
    }
  }

  /// Fallible version of [`map`](Self::map).
  pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<CacheResult<U>, E> {
    Ok(CacheResult {
      data: f(self.data)?,
      source: self.source,
      fetched_at: self.fetched_at,
      version: self.version,
    })
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  Cache,
  /// Joined a request another reader had already started
  Coalesced,
}
