//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! encapsulates async data fetching, loading states, and error handling.
//! A query can watch the cache key it reads: once that entry is invalidated,
//! evicted or replaced, the next `poll()` re-resolves it.
//!
//! # Example
//!
//! ```ignore
//! // Starts fetching right away
//! let mut query = console.students.use_detail(Some("S1"));
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(data) => render_data(data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::api::{ApiError, ApiResult};
use crate::cache::{CacheKey, CacheResult, CacheStore};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(ApiError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Data produced by a fetch together with the cache entry version it came
/// from (`None` if it was never stored).
#[derive(Debug, Clone)]
pub struct Resolved<T> {
  pub data: T,
  pub version: Option<u64>,
}

impl<T> Resolved<T> {
  /// Data that does not come from the cache.
  pub fn unversioned(data: T) -> Self {
    Self { data, version: None }
  }
}

impl<T> From<CacheResult<T>> for Resolved<T> {
  fn from(result: CacheResult<T>) -> Self {
    Self {
      data: result.data,
      version: result.version,
    }
  }
}

/// A boxed future that returns resolved data
type BoxFuture<T> = Pin<Box<dyn Future<Output = ApiResult<Resolved<T>>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

struct Watch {
  store: CacheStore,
  key: CacheKey,
}

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/success/error states
/// - Async result handling via channels
/// - Re-resolution when the watched cache entry goes stale
///
/// Dropping a query drops its receiver. A fetch already running still
/// completes and fills the cache, but its result is never applied to the
/// dropped consumer.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: Option<FetcherFn<T>>,
  receiver: Option<mpsc::UnboundedReceiver<ApiResult<Resolved<T>>>>,
  fetched_at: Option<Instant>,
  watch: Option<Watch>,
  seen_version: Option<u64>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Resolved<T>>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Some(Box::new(move || Box::pin(fetcher()))),
      receiver: None,
      fetched_at: None,
      watch: None,
      seen_version: None,
    }
  }

  /// A query that never fetches and stays `Idle`. Used when the input it
  /// depends on (an id, say) is not available yet.
  pub fn disabled() -> Self {
    Self {
      state: QueryState::Idle,
      fetcher: None,
      receiver: None,
      fetched_at: None,
      watch: None,
      seen_version: None,
    }
  }

  /// Watch `key` in `store`: `poll()` re-resolves the query when that
  /// entry no longer holds the data this query last received.
  pub fn watching(mut self, store: CacheStore, key: CacheKey) -> Self {
    self.watch = Some(Watch { store, key });
    self
  }

  pub fn is_enabled(&self) -> bool {
    self.fetcher.is_some()
  }

  /// The watched cache key, if any.
  pub fn key(&self) -> Option<&CacheKey> {
    self.watch.as_ref().map(|w| &w.key)
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Check if the query is currently loading.
  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Check if the query succeeded.
  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  /// Check if the query failed.
  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error if the query failed.
  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  /// When the data currently held was received.
  pub fn fetched_at(&self) -> Option<Instant> {
    self.fetched_at
  }

  /// Check if the data no longer matches the watched cache entry.
  ///
  /// Only successful, watched queries on an enabled store can be stale.
  pub fn is_stale(&self) -> bool {
    let watch = match (&self.state, &self.watch) {
      (QueryState::Success(_), Some(watch)) if watch.store.is_enabled() => watch,
      _ => return false,
    };
    match (watch.store.status(&watch.key), self.seen_version) {
      (Some(status), Some(seen)) => !status.fresh || status.version != seen,
      // Evicted, or our data was never stored.
      _ => true,
    }
  }

  /// Start fetching data if not already loading.
  ///
  /// This is a no-op if the query is already loading or disabled.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Stop listening to any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results from a pending fetch, or re-resolve stale data.
  ///
  /// Returns `true` if the state changed (data arrived, error occurred, or
  /// a re-fetch started). Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    if let Some(receiver) = &mut self.receiver {
      // Try to receive without blocking
      return match receiver.try_recv() {
        Ok(result) => {
          self.apply(result);
          true
        }
        Err(mpsc::error::TryRecvError::Empty) => false,
        Err(mpsc::error::TryRecvError::Disconnected) => {
          self.apply(Err(ApiError::InvalidResponse("Query was cancelled".to_string())));
          true
        }
      };
    }

    if self.is_stale() {
      self.start_fetch();
      return true;
    }
    false
  }

  /// Wait for the pending fetch, if any, and apply its result.
  ///
  /// Returns `true` if the state changed.
  pub async fn wait(&mut self) -> bool {
    let result = match &mut self.receiver {
      Some(receiver) => receiver.recv().await,
      None => return false,
    };
    self.apply(result.unwrap_or_else(|| Err(ApiError::InvalidResponse("Query was cancelled".to_string()))));
    true
  }

  fn apply(&mut self, result: ApiResult<Resolved<T>>) {
    self.receiver = None;
    match result {
      Ok(resolved) => {
        self.state = QueryState::Success(resolved.data);
        self.seen_version = resolved.version;
        self.fetched_at = Some(Instant::now());
      }
      Err(error) => {
        self.state = QueryState::Error(error);
      }
    }
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let Some(fetcher) = &self.fetcher else {
      return;
    };
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = fetcher();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.
// If you need to share a query, wrap it in Arc<Mutex<Query<T>>>.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("key", &self.watch.as_ref().map(|w| &w.key))
      .field("seen_version", &self.seen_version)
      .finish_non_exhaustive()
  }
}
