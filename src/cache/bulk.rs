//! Reconciliation of "one request, many writes" endpoints.
//!
//! A bulk endpoint answers with a per-item outcome. Only the items the server
//! reports as succeeded touch the cache; failed items leave whatever was cached
//! for them exactly as it was.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::key::{keys, CacheKey, Filters};
use super::relations::{first_field, MutationKind};
use super::resource::{decode, ResourceCache};
use super::traits::Entity;
use crate::api::{ApiRequest, ApiResult};

/// One item the server rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
  /// Position of the item in the submitted batch.
  pub index: usize,
  #[serde(default, alias = "error", alias = "message")]
  pub reason: String,
}

/// Per-item outcome of a bulk call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct BulkResult<T> {
  #[serde(default, alias = "successful", alias = "created")]
  pub succeeded: Vec<T>,
  #[serde(default)]
  pub failed: Vec<BulkFailure>,
}

impl<T> Default for BulkResult<T> {
  fn default() -> Self {
    Self {
      succeeded: Vec::new(),
      failed: Vec::new(),
    }
  }
}

impl<T> BulkResult<T> {
  pub fn is_partial(&self) -> bool {
    !self.failed.is_empty()
  }

  /// Number of items submitted.
  pub fn total(&self) -> usize {
    self.succeeded.len() + self.failed.len()
  }
}

/// Whether a list key's filters describe a set `entity` belongs to. A filter
/// on a field the entity does not carry cannot be ruled out, so it matches.
fn list_covers(key: &CacheKey, entity: &Value) -> bool {
  let Some(filters) = key.filters() else {
    return key.is_list();
  };
  filters_cover(filters, entity)
}

fn filters_cover(filters: &Filters, entity: &Value) -> bool {
  filters.iter().all(|(field, wanted)| match entity.get(field) {
    None | Some(Value::Null) => true,
    Some(actual) => same_value(actual, wanted),
  })
}

fn same_value(actual: &Value, wanted: &Value) -> bool {
  match (actual, wanted) {
    _ if actual == wanted => true,
    // A populated reference stands for its id.
    (Value::Object(_), _) => first_field(actual, &["id", "_id"])
      .is_some_and(|id| same_value(&Value::String(id), wanted)),
    // Filters parsed from a command line are strings while entities carry
    // numbers and booleans, and some endpoints send numbers as strings.
    _ => match (scalar_text(actual), scalar_text(wanted)) {
      (Some(a), Some(b)) => a == b,
      _ => false,
    },
  }
}

fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

impl<T: Entity> ResourceCache<T> {
  /// Send a bulk request and reconcile its outcome.
  ///
  /// Partial failure is not an error: the full result is returned, `failed`
  /// included. Transport errors propagate unchanged and touch nothing.
  pub async fn bulk(&self, request: ApiRequest) -> ApiResult<BulkResult<T>> {
    let response = self.service().transport().request(request).await?;
    let raw: BulkResult<Value> = decode(response)?;
    // Decoded before reconciling: a payload that does not fit `T` fails
    // without touching the cache.
    let succeeded = raw
      .succeeded
      .iter()
      .cloned()
      .map(serde_json::from_value)
      .collect::<Result<Vec<T>, _>>()?;
    self.reconcile(&raw);

    Ok(BulkResult {
      succeeded,
      failed: raw.failed,
    })
  }

  /// Merge the succeeded items of `result` into the cache:
  ///
  /// 1. The resource's create rules run for each item, and every cached list
  ///    of the resource whose filters the item satisfies is marked stale.
  /// 2. Each item becomes the fresh detail entry for its id.
  /// 3. The unfiltered list is marked stale even if nothing succeeded.
  ///
  /// Returns the number of entries that went stale.
  pub fn reconcile(&self, result: &BulkResult<Value>) -> usize {
    let resource = self.resource();
    let store = self.store();
    let mut count = 0;

    for entity in &result.succeeded {
      count += self
        .relations()
        .apply(store, resource, MutationKind::Create, entity, &Value::Null);
      count += store.invalidate_where(|key| {
        key.resource() == Some(resource) && key.is_list() && list_covers(key, entity)
      });
      // Written last so no rule above can mark it stale again.
      match self.response_id(entity) {
        Some(id) => {
          store.overwrite(&keys::detail(resource, &id), entity.clone());
        }
        None => debug!(resource, "bulk item without id, detail not written"),
      }
    }

    count += store.invalidate_exact(&keys::list(resource, &Filters::new()));

    if result.is_partial() {
      warn!(
        resource,
        succeeded = result.succeeded.len(),
        failed = result.failed.len(),
        "bulk operation partially failed"
      );
    }
    debug!(resource, count, "bulk result reconciled");
    count
  }
}
