//! Process-wide cache store.
//!
//! `CacheStore` is a cheap, clonable handle to one shared map of entries.
//! Every mutation of cached data goes through `invalidate*`, `evict` or
//! `overwrite`; nothing hands out mutable access to a stored value.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tracing::debug;

use super::key::CacheKey;
use super::traits::{CacheResult, CacheSource};
use crate::api::ApiResult;

/// Default time after which an entry is re-fetched even if nobody
/// invalidated it.
const DEFAULT_STALE_MINUTES: i64 = 5;

/// A materialized read result plus liveness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub value: Value,
  pub fetched_at: DateTime<Utc>,
  /// Set by invalidation; the next read re-fetches.
  pub invalidated: bool,
  /// Changes every time the entry is (re)written.
  pub version: u64,
}

/// Freshness of a key as seen by a watching query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStatus {
  pub version: u64,
  pub fresh: bool,
}

type SharedFetch = Shared<BoxFuture<'static, ApiResult<Value>>>;

struct InFlight {
  id: u64,
  future: SharedFetch,
}

#[derive(Default)]
struct StoreState {
  entries: HashMap<CacheKey, CacheEntry>,
  in_flight: HashMap<CacheKey, InFlight>,
}

/// Counters for cache operations
#[derive(Debug, Default)]
pub struct CacheStats {
  hits: AtomicU64,
  misses: AtomicU64,
  coalesced: AtomicU64,
  invalidations: AtomicU64,
  evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
  pub hits: u64,
  pub misses: u64,
  pub coalesced: u64,
  pub invalidations: u64,
  pub evictions: u64,
}

impl CacheStats {
  fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      coalesced: self.coalesced.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
    }
  }
}

/// Shared cache of read results keyed by [`CacheKey`].
#[derive(Clone)]
pub struct CacheStore {
  state: Arc<Mutex<StoreState>>,
  stats: Arc<CacheStats>,
  versions: Arc<AtomicU64>,
  stale_time: Duration,
  enabled: bool,
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore {
  /// Create an empty store.
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(StoreState::default())),
      stats: Arc::new(CacheStats::default()),
      versions: Arc::new(AtomicU64::new(0)),
      stale_time: Duration::minutes(DEFAULT_STALE_MINUTES),
      enabled: true,
    }
  }

  /// A store that never keeps anything: every read goes to the network.
  pub fn disabled() -> Self {
    Self {
      enabled: false,
      ..Self::new()
    }
  }

  /// Set the age after which entries count as stale.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn stale_time(&self) -> Duration {
    self.stale_time
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }

  fn lock(&self) -> MutexGuard<'_, StoreState> {
    // Every critical section leaves the maps consistent, so a panic in
    // another holder does not corrupt them.
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn next_version(&self) -> u64 {
    self.versions.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn is_fresh(&self, entry: &CacheEntry) -> bool {
    !entry.invalidated && Utc::now() - entry.fetched_at < self.stale_time
  }

  /// Read through the cache.
  ///
  /// 1. A fresh entry is returned without touching the network.
  /// 2. If another reader is already fetching this key, wait for its result.
  /// 3. Otherwise run `fetcher` and store its result.
  ///
  /// Errors are returned unchanged and leave any existing entry in place.
  /// A result whose key was invalidated while the request was in flight is
  /// returned to the caller but not stored.
  pub async fn fetch<F, Fut>(&self, key: &CacheKey, fetcher: F) -> ApiResult<CacheResult<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
  {
    if !self.enabled {
      let data = fetcher().await?;
      return Ok(CacheResult {
        data,
        source: CacheSource::Network,
        fetched_at: Utc::now(),
        version: None,
      });
    }

    let (flight_id, future, source) = {
      let mut state = self.lock();

      if let Some(entry) = state.entries.get(key) {
        if self.is_fresh(entry) {
          CacheStats::add(&self.stats.hits, 1);
          debug!(%key, "cache hit");
          return Ok(CacheResult {
            data: entry.value.clone(),
            source: CacheSource::Cache,
            fetched_at: entry.fetched_at,
            version: Some(entry.version),
          });
        }
      }

      if let Some(flight) = state.in_flight.get(key) {
        CacheStats::add(&self.stats.coalesced, 1);
        debug!(%key, "joining in-flight request");
        (flight.id, flight.future.clone(), CacheSource::Coalesced)
      } else {
        CacheStats::add(&self.stats.misses, 1);
        debug!(%key, "cache miss, fetching");
        let id = self.next_version();
        let future = fetcher().boxed().shared();
        state.in_flight.insert(
          key.clone(),
          InFlight {
            id,
            future: future.clone(),
          },
        );
        (id, future, CacheSource::Network)
      }
    };

    let result = future.await;

    let mut state = self.lock();
    // Whoever observes the completion first settles the flight. If the key
    // was invalidated meanwhile the flight is no longer registered.
    let registered = state
      .in_flight
      .get(key)
      .is_some_and(|flight| flight.id == flight_id);
    if registered {
      state.in_flight.remove(key);
    }

    let data = result.inspect_err(|err| debug!(%key, error = %err, "fetch failed"))?;

    if registered {
      state.entries.insert(
        key.clone(),
        CacheEntry {
          value: data.clone(),
          fetched_at: Utc::now(),
          invalidated: false,
          version: flight_id,
        },
      );
    }

    let stored = state.entries.get(key).filter(|entry| entry.version == flight_id);
    if stored.is_none() {
      debug!(%key, "key changed while in flight, result not stored");
    }
    Ok(CacheResult {
      fetched_at: stored.map(|entry| entry.fetched_at).unwrap_or_else(Utc::now),
      version: stored.map(|entry| entry.version),
      data,
      source,
    })
  }

  /// Mark every entry whose key matches `pattern` (see [`CacheKey::matches`])
  /// as stale. Returns the number of entries that changed state; invalidating
  /// an already stale entry is a no-op.
  pub fn invalidate(&self, pattern: &CacheKey) -> usize {
    let count = self.invalidate_where(|key| key.matches(pattern));
    debug!(%pattern, count, "invalidated");
    count
  }

  /// Mark exactly one key as stale.
  pub fn invalidate_exact(&self, key: &CacheKey) -> usize {
    self.invalidate_where(|candidate| candidate == key)
  }

  /// Mark every key accepted by `predicate` as stale.
  ///
  /// Requests in flight for those keys are detached: their results still
  /// reach the callers that started them but are not stored, and the next
  /// read starts a new request.
  pub fn invalidate_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
    let mut state = self.lock();
    let mut count = 0;
    for (key, entry) in state.entries.iter_mut() {
      if !entry.invalidated && predicate(key) {
        entry.invalidated = true;
        count += 1;
      }
    }
    state.in_flight.retain(|key, _| !predicate(key));
    CacheStats::add(&self.stats.invalidations, count);
    count
  }

  /// Remove every entry whose key matches `pattern`.
  pub fn evict(&self, pattern: &CacheKey) -> usize {
    let mut state = self.lock();
    let before = state.entries.len();
    state.entries.retain(|key, _| !key.matches(pattern));
    state.in_flight.retain(|key, _| !key.matches(pattern));
    let count = before - state.entries.len();
    CacheStats::add(&self.stats.evictions, count);
    debug!(%pattern, count, "evicted");
    count
  }

  /// Store `value` as a fresh entry, replacing whatever was there.
  /// Returns the new entry version, or `None` if caching is disabled.
  pub fn overwrite(&self, key: &CacheKey, value: Value) -> Option<u64> {
    if !self.enabled {
      return None;
    }
    let version = self.next_version();
    let mut state = self.lock();
    state.in_flight.remove(key);
    state.entries.insert(
      key.clone(),
      CacheEntry {
        value,
        fetched_at: Utc::now(),
        invalidated: false,
        version,
      },
    );
    debug!(%key, version, "overwritten");
    Some(version)
  }

  /// Copy of the entry stored under `key`, fresh or not.
  pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.lock().entries.get(key).cloned()
  }

  pub fn status(&self, key: &CacheKey) -> Option<EntryStatus> {
    self.lock().entries.get(key).map(|entry| EntryStatus {
      version: entry.version,
      fresh: self.is_fresh(entry),
    })
  }

  pub fn is_in_flight(&self, key: &CacheKey) -> bool {
    self.lock().in_flight.contains_key(key)
  }

  pub fn keys(&self) -> Vec<CacheKey> {
    self.lock().entries.keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().entries.is_empty()
  }

  /// Drop all entries and forget pending requests.
  pub fn clear(&self) {
    let mut state = self.lock();
    state.entries.clear();
    state.in_flight.clear();
  }
}

impl fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheStore")
      .field("entries", &self.len())
      .field("stale_time", &self.stale_time)
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::ApiError;
  use crate::cache::key::{keys, Filters};
  use serde_json::json;
  use std::sync::atomic::AtomicU32;
  use std::time::Duration as StdDuration;

  fn counting_fetcher(
    counter: &Arc<AtomicU32>,
    value: Value,
  ) -> impl FnOnce() -> BoxFuture<'static, ApiResult<Value>> {
    let counter = counter.clone();
    move || {
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        Ok(value)
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_second_read_is_a_hit() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let key = keys::detail("students", "S1");

    let first = store
      .fetch(&key, counting_fetcher(&calls, json!({"id": "S1"})))
      .await
      .unwrap();
    let second = store
      .fetch(&key, counting_fetcher(&calls, json!({"id": "other"})))
      .await
      .unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data, json!({"id": "S1"}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.version, second.version);
  }

  #[tokio::test]
  async fn test_concurrent_reads_are_coalesced() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let key = keys::list("students", &Filters::new());

    let (a, b, c) = tokio::join!(
      store.fetch(&key, counting_fetcher(&calls, json!([1]))),
      store.fetch(&key, counting_fetcher(&calls, json!([2]))),
      store.fetch(&key, counting_fetcher(&calls, json!([3]))),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap().data, json!([1]));
    assert_eq!(b.unwrap().data, json!([1]));
    assert_eq!(c.unwrap().source, CacheSource::Coalesced);
    assert_eq!(store.len(), 1);
    assert!(!store.is_in_flight(&key));
    assert_eq!(store.stats().coalesced, 2);
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch_once() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let key = keys::detail("students", "S1");

    store.fetch(&key, counting_fetcher(&calls, json!(1))).await.unwrap();
    assert_eq!(store.invalidate(&keys::details("students")), 1);
    assert_eq!(store.invalidate(&keys::details("students")), 0);
    assert_eq!(store.status(&key).map(|s| s.fresh), Some(false));

    let refreshed = store.fetch(&key, counting_fetcher(&calls, json!(2))).await.unwrap();
    store.fetch(&key, counting_fetcher(&calls, json!(3))).await.unwrap();

    assert_eq!(refreshed.data, json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.stats().invalidations, 1);
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_stale_entry() {
    let store = CacheStore::new();
    let key = keys::detail("staff", "T1");
    store.overwrite(&key, json!({"id": "T1"}));
    store.invalidate_exact(&key);

    let result = store
      .fetch(&key, || async { Err::<Value, _>(ApiError::ServerError("down".into())) })
      .await;

    assert!(matches!(result, Err(ApiError::ServerError(_))));
    let entry = store.peek(&key).unwrap();
    assert_eq!(entry.value, json!({"id": "T1"}));
    assert!(entry.invalidated);
  }

  #[tokio::test]
  async fn test_invalidation_during_flight_is_not_overwritten() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let key = keys::detail("students", "S1");

    let reader = {
      let store = store.clone();
      let key = key.clone();
      let fetcher = counting_fetcher(&calls, json!("before write"));
      tokio::spawn(async move { store.fetch(&key, fetcher).await })
    };
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    store.invalidate(&keys::all("students"));

    let early = reader.await.unwrap().unwrap();
    assert_eq!(early.data, json!("before write"));
    assert_eq!(early.version, None);
    assert!(store.peek(&key).is_none());

    let late = store
      .fetch(&key, counting_fetcher(&calls, json!("after write")))
      .await
      .unwrap();
    assert_eq!(late.data, json!("after write"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_evict_removes_detail_and_views() {
    let store = CacheStore::new();
    store.overwrite(&keys::detail("feePayments", "P1"), json!({"id": "P1"}));
    store.overwrite(&keys::detail_view("feePayments", "P1", "receipt"), json!({}));
    store.overwrite(&keys::detail("feePayments", "P2"), json!({"id": "P2"}));

    assert_eq!(store.evict(&keys::detail("feePayments", "P1")), 2);
    assert_eq!(store.len(), 1);
    assert_eq!(store.stats().evictions, 2);
  }

  #[tokio::test]
  async fn test_entries_expire_after_stale_time() {
    let store = CacheStore::new().with_stale_time(Duration::zero());
    let calls = Arc::new(AtomicU32::new(0));
    let key = keys::lists("expenses");

    store.fetch(&key, counting_fetcher(&calls, json!([]))).await.unwrap();
    store.fetch(&key, counting_fetcher(&calls, json!([]))).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_disabled_store_keeps_nothing() {
    let store = CacheStore::disabled();
    let calls = Arc::new(AtomicU32::new(0));
    let key = keys::detail("students", "S1");

    let result = store.fetch(&key, counting_fetcher(&calls, json!(1))).await.unwrap();
    store.fetch(&key, counting_fetcher(&calls, json!(1))).await.unwrap();

    assert_eq!(result.version, None);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.overwrite(&key, json!(2)), None);
    assert!(store.is_empty());
  }
}
