//! Uniform remote access for one resource.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use super::error::ApiResult;
use super::transport::{ApiRequest, Transport};
use crate::cache::{Entity, Filters, ResourceName};

/// Extracts the canonical identifier from an entity.
pub type IdFn<T> = fn(&T) -> Option<String>;

/// The five-method contract every resource implements against the transport,
/// bound to one base path such as `/students`.
///
/// Responses come back as raw JSON; decoding them into `T` is left to the
/// cache, which has to inspect the JSON for ids and foreign keys anyway.
/// Bespoke endpoints (receipts, bulk operations) build their own
/// [`ApiRequest`] on top of [`path`](Self::path).
pub struct EntityService<T> {
  transport: Arc<dyn Transport>,
  base_path: &'static str,
  id_of: IdFn<T>,
  _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityService<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      base_path: self.base_path,
      id_of: self.id_of,
      _entity: PhantomData,
    }
  }
}

impl<T> fmt::Debug for EntityService<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntityService")
      .field("base_path", &self.base_path)
      .finish_non_exhaustive()
  }
}

/// Some endpoints wrap payloads as `{"data": ...}`; accept both shapes.
pub fn unwrap_envelope(value: Value) -> Value {
  match value {
    Value::Object(mut map) if map.contains_key("data") && map.len() <= 3 => {
      let has_only_envelope_keys = map
        .keys()
        .all(|k| matches!(k.as_str(), "data" | "meta" | "message"));
      if has_only_envelope_keys {
        map.remove("data").unwrap_or(Value::Null)
      } else {
        Value::Object(map)
      }
    }
    other => other,
  }
}

impl<T: Entity> EntityService<T> {
  pub fn new(transport: Arc<dyn Transport>, base_path: &'static str, id_of: IdFn<T>) -> Self {
    Self {
      transport,
      base_path,
      id_of,
      _entity: PhantomData,
    }
  }

  pub fn resource(&self) -> ResourceName {
    T::resource()
  }

  pub fn base_path(&self) -> &'static str {
    self.base_path
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  /// Canonical id of `entity`. Empty ids count as absent.
  pub fn id_of(&self, entity: &T) -> Option<String> {
    (self.id_of)(entity).filter(|id| !id.is_empty())
  }

  /// Path below the base path, e.g. `path("bulk")` -> `/fee-payments/bulk`.
  pub fn path(&self, suffix: &str) -> String {
    format!("{}/{}", self.base_path, suffix.trim_start_matches('/'))
  }

  /// `GET base?filters`
  pub fn list_raw(&self, filters: &Filters) -> BoxFuture<'static, ApiResult<Value>> {
    self
      .transport
      .request(ApiRequest::get(self.base_path).params(filters.to_params()))
  }

  /// `GET base/id`
  pub fn get_raw(&self, id: &str) -> BoxFuture<'static, ApiResult<Value>> {
    self.transport.request(ApiRequest::get(self.path(id)))
  }

  /// `POST base` with `dto` as the body.
  pub async fn create_raw<D: Serialize + ?Sized>(&self, dto: &D) -> ApiResult<Value> {
    let body = serde_json::to_value(dto)?;
    self.transport.request(ApiRequest::post(self.base_path).body(body)).await
  }

  /// `PATCH base/id` with `dto` as the body.
  pub async fn update_raw<D: Serialize + ?Sized>(&self, id: &str, dto: &D) -> ApiResult<Value> {
    let body = serde_json::to_value(dto)?;
    self.transport.request(ApiRequest::patch(self.path(id)).body(body)).await
  }

  pub async fn remove(&self, id: &str) -> ApiResult<()> {
    self.transport.request(ApiRequest::delete(self.path(id))).await?;
    Ok(())
  }
}
