//! Read hooks and write operations for one resource.
//!
//! `ResourceCache<T>` binds an [`EntityService`] to the shared store. Reads go
//! through the store; writes call the service and, once the server has
//! answered, invalidate what the write made stale: the resource's own lists
//! and detail, then whatever the relation rules name on other resources.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::key::{keys, CacheKey, Filters, ResourceName};
use super::relations::{MutationKind, RelationGraph};
use super::store::CacheStore;
use super::traits::{CacheResult, Entity};
use crate::api::service::unwrap_envelope;
use crate::api::{ApiError, ApiRequest, ApiResult, EntityService};
use crate::query::{Query, Resolved};

/// Decode a (possibly enveloped) JSON payload.
pub(crate) fn decode<R: DeserializeOwned>(value: Value) -> ApiResult<R> {
  Ok(serde_json::from_value(unwrap_envelope(value))?)
}

/// Cached access to one resource.
pub struct ResourceCache<T> {
  service: EntityService<T>,
  store: CacheStore,
  relations: Arc<RelationGraph>,
}

impl<T> Clone for ResourceCache<T> {
  fn clone(&self) -> Self {
    Self {
      service: self.service.clone(),
      store: self.store.clone(),
      relations: Arc::clone(&self.relations),
    }
  }
}

impl<T> fmt::Debug for ResourceCache<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResourceCache")
      .field("service", &self.service)
      .field("store", &self.store)
      .finish_non_exhaustive()
  }
}

impl<T: Entity> ResourceCache<T> {
  pub fn new(service: EntityService<T>, store: CacheStore, relations: Arc<RelationGraph>) -> Self {
    Self {
      service,
      store,
      relations,
    }
  }

  pub fn resource(&self) -> ResourceName {
    T::resource()
  }

  pub fn service(&self) -> &EntityService<T> {
    &self.service
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn relations(&self) -> &RelationGraph {
    &self.relations
  }

  // ---------------------------------------------------------------------------
  // Reads
  // ---------------------------------------------------------------------------

  /// Read `key` through the store, fetching with `request` on a miss.
  pub async fn read<R: DeserializeOwned>(
    &self,
    key: &CacheKey,
    request: ApiRequest,
  ) -> ApiResult<CacheResult<R>> {
    let transport = self.service.transport();
    let result = self.store.fetch(key, || transport.request(request)).await?;
    result.try_map(decode)
  }

  pub async fn fetch_list(&self, filters: &Filters) -> ApiResult<CacheResult<Vec<T>>> {
    let key = keys::list(self.resource(), filters);
    let result = self
      .store
      .fetch(&key, || self.service.list_raw(filters))
      .await?;
    result.try_map(decode)
  }

  pub async fn list(&self, filters: &Filters) -> ApiResult<Vec<T>> {
    Ok(self.fetch_list(filters).await?.data)
  }

  /// Read one entity. An empty id never reaches the network.
  pub async fn fetch_detail(&self, id: &str) -> ApiResult<Option<CacheResult<T>>> {
    if id.is_empty() {
      return Ok(None);
    }
    let key = keys::detail(self.resource(), id);
    let result = self.store.fetch(&key, || self.service.get_raw(id)).await?;
    Ok(Some(result.try_map(decode)?))
  }

  pub async fn detail(&self, id: &str) -> ApiResult<Option<T>> {
    Ok(self.fetch_detail(id).await?.map(|result| result.data))
  }

  /// Read-only sub-view of one entity, cached under its detail key.
  pub async fn view<R: DeserializeOwned>(
    &self,
    id: &str,
    view: &str,
    request: ApiRequest,
  ) -> ApiResult<CacheResult<R>> {
    self
      .read(&keys::detail_view(self.resource(), id, view), request)
      .await
  }

  /// List query that starts resolving immediately and re-resolves when its
  /// cache entry goes stale. Must be called within a Tokio runtime.
  pub fn use_list(&self, filters: Filters) -> ListQuery<T> {
    let mut query = self.list_query(&filters);
    query.fetch();
    ListQuery {
      cache: self.clone(),
      filters,
      query,
    }
  }

  /// Detail query for `id`. Stays idle, without fetching, while the id is
  /// absent or empty.
  pub fn use_detail(&self, id: Option<&str>) -> Query<T> {
    let Some(id) = id.filter(|id| !id.is_empty()).map(str::to_string) else {
      return Query::disabled();
    };
    let key = keys::detail(self.resource(), &id);
    let cache = self.clone();
    let mut query = Query::new(move || {
      let cache = cache.clone();
      let id = id.clone();
      async move {
        let result = cache.fetch_detail(&id).await?;
        result.map(Resolved::from).ok_or(ApiError::NotFound(id))
      }
    })
    .watching(self.store.clone(), key);
    query.fetch();
    query
  }

  fn list_query(&self, filters: &Filters) -> Query<Vec<T>> {
    let key = keys::list(self.resource(), filters);
    let cache = self.clone();
    let filters = filters.clone();
    Query::new(move || {
      let cache = cache.clone();
      let filters = filters.clone();
      async move { Ok(Resolved::from(cache.fetch_list(&filters).await?)) }
    })
    .watching(self.store.clone(), key)
  }

  // ---------------------------------------------------------------------------
  // Writes
  // ---------------------------------------------------------------------------

  /// `POST base`, then mark every list of the resource stale.
  pub async fn create<D: Serialize + ?Sized>(&self, dto: &D) -> ApiResult<T> {
    let request = serde_json::to_value(dto)?;
    let response = unwrap_envelope(self.service.create_raw(&request).await?);
    self.settle(MutationKind::Create, None, &request, &response);
    decode(response)
  }

  /// `PATCH base/id`, then mark the lists and the entity's detail stale.
  /// The detail is looked up under the id in the response as well as the
  /// id the caller addressed.
  pub async fn update<D: Serialize + ?Sized>(&self, id: &str, dto: &D) -> ApiResult<T> {
    let request = serde_json::to_value(dto)?;
    let response = unwrap_envelope(self.service.update_raw(id, &request).await?);
    self.settle(MutationKind::Update, Some(id), &request, &response);
    decode(response)
  }

  /// `DELETE base/id`, then evict the entity (views included) and mark the
  /// lists stale.
  pub async fn delete(&self, id: &str) -> ApiResult<()> {
    // Rules for a delete only have the request to go on; hand them the last
    // known state of the entity so foreign keys are still available.
    let request = self
      .store
      .peek(&keys::detail(self.resource(), id))
      .map(|entry| unwrap_envelope(entry.value))
      .unwrap_or_else(|| json!({ "id": id }));
    self.service.remove(id).await?;
    self.settle(MutationKind::Delete, Some(id), &request, &Value::Null);
    Ok(())
  }

  /// Resource-specific write on one entity (approve, toggle, ...). Settles
  /// like an update, then runs the rules registered for `Custom(name)`.
  pub async fn custom(&self, name: &'static str, id: &str, request: ApiRequest) -> ApiResult<T> {
    let body = request.body.clone().unwrap_or(Value::Null);
    let response = self.send(request).await?;
    self.settle(MutationKind::Custom(name), Some(id), &body, &response);
    decode(response)
  }

  async fn send(&self, request: ApiRequest) -> ApiResult<Value> {
    Ok(unwrap_envelope(self.service.transport().request(request).await?))
  }

  /// Apply the invalidations a successful mutation implies. `id` is the id
  /// the caller addressed, if any. Returns the number of entries that went
  /// stale.
  pub fn settle(
    &self,
    kind: MutationKind,
    id: Option<&str>,
    request: &Value,
    response: &Value,
  ) -> usize {
    let resource = self.resource();
    let mut count = 0;

    match kind {
      MutationKind::Create => {}
      MutationKind::Delete => {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
          self.store.evict(&keys::detail(resource, id));
        }
      }
      MutationKind::Update | MutationKind::Custom(_) => {
        // The server's id first, then the one the caller addressed when it
        // differs: both details may hold the pre-write entity.
        let mut ids: Vec<String> = self
          .response_id(response)
          .into_iter()
          .chain(id.filter(|id| !id.is_empty()).map(str::to_string))
          .collect();
        ids.dedup();
        if ids.is_empty() {
          debug!(resource, %kind, "no id to invalidate a detail for");
        }
        for id in &ids {
          count += self.store.invalidate(&keys::detail(resource, id));
        }
      }
    }

    count += self.store.invalidate(&keys::lists(resource));
    count += self
      .relations
      .apply(&self.store, resource, kind, response, request);
    debug!(resource, %kind, count, "mutation settled");
    count
  }

  /// Canonical id of an entity given as JSON.
  pub fn response_id(&self, value: &Value) -> Option<String> {
    serde_json::from_value::<T>(value.clone())
      .ok()
      .and_then(|entity| self.service.id_of(&entity))
  }
}

/// A list query whose filters can change.
///
/// Derefs to the underlying [`Query`], so `poll`, `state` and friends are
/// called on it directly.
pub struct ListQuery<T> {
  cache: ResourceCache<T>,
  filters: Filters,
  query: Query<Vec<T>>,
}

impl<T: Entity> ListQuery<T> {
  pub fn filters(&self) -> &Filters {
    &self.filters
  }

  /// Switch to another filter set and resolve it. Value-equal filters are a
  /// no-op. Returns `true` if a new resolution started.
  pub fn set_filters(&mut self, filters: Filters) -> bool {
    if filters == self.filters {
      return false;
    }
    self.query = self.cache.list_query(&filters);
    self.filters = filters;
    self.query.fetch();
    true
  }
}

impl<T> Deref for ListQuery<T> {
  type Target = Query<Vec<T>>;

  fn deref(&self) -> &Self::Target {
    &self.query
  }
}

impl<T> DerefMut for ListQuery<T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.query
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::MockTransport;
  use crate::cache::CacheSource;
  use reqwest::Method;
  use serde::Deserialize;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Book {
    #[serde(alias = "_id")]
    id: String,
    title: String,
  }

  impl Entity for Book {
    fn resource() -> ResourceName {
      "books"
    }
  }

  fn books(mock: &MockTransport) -> ResourceCache<Book> {
    let service = EntityService::new(Arc::new(mock.clone()), "/books", |b: &Book| Some(b.id.clone()));
    ResourceCache::new(service, CacheStore::new(), Arc::new(RelationGraph::new()))
  }

  /// `GET /books/B1` answers with an incrementing title.
  fn versioned_detail(mock: &MockTransport) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    mock.route(Method::GET, "/books/B1", move |_| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      Ok(json!({"id": "B1", "title": format!("v{}", n)}))
    });
    calls
  }

  #[tokio::test]
  async fn test_detail_is_cached() {
    let mock = MockTransport::new();
    versioned_detail(&mock);
    let cache = books(&mock);

    let first = cache.fetch_detail("B1").await.unwrap().unwrap();
    let second = cache.fetch_detail("B1").await.unwrap().unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.title, "v0");
    assert_eq!(mock.count(Method::GET, "/books/B1"), 1);
  }

  #[tokio::test]
  async fn test_empty_id_never_fetches() {
    let mock = MockTransport::new();
    let cache = books(&mock);

    assert_eq!(cache.detail("").await.unwrap(), None);
    let query = cache.use_detail(Some(""));
    assert!(!query.is_enabled());
    assert!(!cache.use_detail(None).is_enabled());
    assert!(mock.requests().is_empty());
  }

  #[tokio::test]
  async fn test_lists_with_equal_filters_share_an_entry() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/books", json!([{"id": "B1", "title": "x"}]));
    let cache = books(&mock);

    cache
      .list(&Filters::from_json(&json!({"author": "A", "year": null})))
      .await
      .unwrap();
    cache.list(&Filters::new().with("author", "A")).await.unwrap();

    assert_eq!(mock.count(Method::GET, "/books"), 1);
  }

  #[tokio::test]
  async fn test_concurrent_list_reads_share_one_request() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(20));
    mock.respond(Method::GET, "/books", json!({"data": []}));
    let cache = books(&mock);
    let filters = Filters::new();

    let (a, b) = tokio::join!(cache.list(&filters), cache.list(&filters));
    assert!(a.unwrap().is_empty());
    assert!(b.unwrap().is_empty());
    assert_eq!(mock.count(Method::GET, "/books"), 1);
  }

  #[tokio::test]
  async fn test_create_invalidates_every_list() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/books", json!([]));
    mock.respond(Method::POST, "/books", json!({"id": "B2", "title": "new"}));
    let cache = books(&mock);

    cache.list(&Filters::new()).await.unwrap();
    cache.list(&Filters::new().with("author", "A")).await.unwrap();
    let created = cache.create(&json!({"title": "new"})).await.unwrap();
    assert_eq!(created.id, "B2");

    cache.list(&Filters::new()).await.unwrap();
    cache.list(&Filters::new().with("author", "A")).await.unwrap();
    assert_eq!(mock.count(Method::GET, "/books"), 4);
  }

  #[tokio::test]
  async fn test_fresh_after_write() {
    let mock = MockTransport::new();
    let calls = versioned_detail(&mock);
    mock.respond(Method::PATCH, "/books/B1", json!({"_id": "B1", "title": "edited"}));
    let cache = books(&mock);

    assert_eq!(cache.detail("B1").await.unwrap().unwrap().title, "v0");
    cache.update("B1", &json!({"title": "edited"})).await.unwrap();

    assert_eq!(cache.detail("B1").await.unwrap().unwrap().title, "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_update_invalidates_response_and_requested_ids() {
    let mock = MockTransport::new();
    mock.respond(Method::PATCH, "/books/legacy-7", json!({"id": "B7", "title": "x"}));
    let cache = books(&mock);
    cache.store().overwrite(&keys::detail("books", "B7"), json!({"id": "B7", "title": "old"}));
    cache.store().overwrite(&keys::detail("books", "legacy-7"), json!({"id": "B7", "title": "old"}));

    cache.update("legacy-7", &json!({"title": "x"})).await.unwrap();

    let status = |id| cache.store().status(&keys::detail("books", id)).map(|s| s.fresh);
    assert_eq!(status("B7"), Some(false));
    assert_eq!(status("legacy-7"), Some(false));
  }

  #[tokio::test]
  async fn test_detail_under_old_id_refetches_after_update() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/books/legacy-7", json!({"id": "legacy-7", "title": "old"}));
    mock.respond(Method::PATCH, "/books/legacy-7", json!({"id": "B7", "title": "new"}));
    let cache = books(&mock);

    cache.detail("legacy-7").await.unwrap();
    cache.update("legacy-7", &json!({"title": "new"})).await.unwrap();

    let reread = cache.fetch_detail("legacy-7").await.unwrap().unwrap();
    assert_eq!(reread.source, CacheSource::Network);
    assert_eq!(mock.count(Method::GET, "/books/legacy-7"), 2);
  }

  #[tokio::test]
  async fn test_read_started_before_update_is_not_stored() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(30));
    let calls = versioned_detail(&mock);
    mock.respond(Method::PATCH, "/books/B1", json!({"id": "B1", "title": "edited"}));
    let cache = books(&mock);

    let early = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.detail("B1").await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    cache.update("B1", &json!({"title": "edited"})).await.unwrap();

    assert_eq!(early.await.unwrap().unwrap().unwrap().title, "v0");
    assert_eq!(cache.detail("B1").await.unwrap().unwrap().title, "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_delete_evicts_detail_and_views() {
    let mock = MockTransport::new();
    versioned_detail(&mock);
    mock.respond(Method::DELETE, "/books/B1", Value::Null);
    mock.respond(Method::GET, "/books/B1/summary", json!({"pages": 3}));
    let cache = books(&mock);

    cache.detail("B1").await.unwrap();
    cache
      .view::<Value>("B1", "summary", ApiRequest::get("/books/B1/summary"))
      .await
      .unwrap();
    cache.delete("B1").await.unwrap();

    assert!(cache.store().peek(&keys::detail("books", "B1")).is_none());
    assert!(cache.store().is_empty());
  }

  #[tokio::test]
  async fn test_failed_write_leaves_cache_alone() {
    let mock = MockTransport::new();
    versioned_detail(&mock);
    mock.route(Method::PATCH, "/books/B1", |_| Err(ApiError::ServerError("boom".into())));
    let cache = books(&mock);

    cache.detail("B1").await.unwrap();
    let err = cache.update("B1", &json!({"title": "x"})).await.unwrap_err();

    assert!(matches!(err, ApiError::ServerError(_)));
    assert_eq!(
      cache.store().status(&keys::detail("books", "B1")).map(|s| s.fresh),
      Some(true)
    );
  }

  #[tokio::test]
  async fn test_detail_query_follows_invalidation() {
    let mock = MockTransport::new();
    versioned_detail(&mock);
    let cache = books(&mock);

    let mut query = cache.use_detail(Some("B1"));
    query.wait().await;
    assert_eq!(query.data().map(|b| b.title.as_str()), Some("v0"));

    cache.settle(MutationKind::Update, Some("B1"), &Value::Null, &Value::Null);
    assert!(query.poll());
    query.wait().await;
    assert_eq!(query.data().map(|b| b.title.as_str()), Some("v1"));
  }

  #[tokio::test]
  async fn test_list_query_set_filters() {
    let mock = MockTransport::new();
    mock.route(Method::GET, "/books", |req| {
      let author = req
        .params
        .iter()
        .find(|(k, _)| k == "author")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
      Ok(json!([{"id": format!("by-{}", author), "title": "t"}]))
    });
    let cache = books(&mock);

    let mut query = cache.use_list(Filters::new().with("author", "A"));
    query.wait().await;
    assert_eq!(query.data().map(|b| b[0].id.clone()), Some("by-A".to_string()));

    assert!(!query.set_filters(Filters::new().with("author", "A")));
    assert!(query.set_filters(Filters::new().with("author", "B")));
    query.wait().await;
    assert_eq!(query.data().map(|b| b[0].id.clone()), Some("by-B".to_string()));
    assert_eq!(mock.count(Method::GET, "/books"), 2);
  }
}
