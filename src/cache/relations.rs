//! Cross-resource invalidation rules.
//!
//! The resource cache only knows about one resource at a time. Rules declared
//! here say which keys of *other* resources go stale after a mutation, e.g. a
//! fee payment changing the paid/due amounts of its student fee.
//!
//! Rules are plain functions of `(response, request)` registered per
//! `(resource, mutation)` at start-up, so the whole graph can be inspected
//! and tested without issuing requests.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use super::key::{CacheKey, ResourceName};
use super::store::CacheStore;

/// The mutation a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
  Create,
  Update,
  Delete,
  /// Resource-specific operation, e.g. `Custom("approve")`.
  Custom(&'static str),
}

impl fmt::Display for MutationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MutationKind::Create => f.write_str("create"),
      MutationKind::Update => f.write_str("update"),
      MutationKind::Delete => f.write_str("delete"),
      MutationKind::Custom(name) => f.write_str(name),
    }
  }
}

/// `(response, request) -> key patterns to invalidate`.
///
/// A rule returns an empty list when a field it needs is missing; that step
/// is skipped rather than failing the mutation.
pub type RuleFn = fn(&Value, &Value) -> Vec<CacheKey>;

#[derive(Clone, Copy)]
pub struct Rule {
  pub name: &'static str,
  pub apply: RuleFn,
}

impl fmt::Debug for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Rule").field("name", &self.name).finish()
  }
}

/// Registry of invalidation rules keyed by `(resource, mutation)`.
#[derive(Debug, Default)]
pub struct RelationGraph {
  rules: HashMap<(ResourceName, MutationKind), Vec<Rule>>,
}

impl RelationGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `apply` for one mutation of `resource`.
  pub fn register(
    &mut self,
    resource: ResourceName,
    kind: MutationKind,
    name: &'static str,
    apply: RuleFn,
  ) -> &mut Self {
    self
      .rules
      .entry((resource, kind))
      .or_default()
      .push(Rule { name, apply });
    self
  }

  /// Register the same rule for several mutations.
  pub fn on(
    &mut self,
    resource: ResourceName,
    kinds: &[MutationKind],
    name: &'static str,
    apply: RuleFn,
  ) -> &mut Self {
    for kind in kinds {
      self.register(resource, *kind, name, apply);
    }
    self
  }

  pub fn rules(&self, resource: ResourceName, kind: MutationKind) -> &[Rule] {
    self
      .rules
      .get(&(resource, kind))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// Number of registered rules across all mutations.
  pub fn len(&self) -> usize {
    self.rules.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Evaluate every rule for the mutation, without touching any cache.
  /// Duplicate patterns are reported once.
  pub fn keys_for(
    &self,
    resource: ResourceName,
    kind: MutationKind,
    response: &Value,
    request: &Value,
  ) -> Vec<CacheKey> {
    let mut keys: Vec<CacheKey> = Vec::new();
    for rule in self.rules(resource, kind) {
      let produced = (rule.apply)(response, request);
      if produced.is_empty() {
        debug!(resource, %kind, rule = rule.name, "rule produced no keys, skipped");
      }
      for key in produced {
        if !keys.contains(&key) {
          keys.push(key);
        }
      }
    }
    keys
  }

  /// Evaluate the rules and invalidate what they name. Returns the number of
  /// entries that went stale.
  pub fn apply(
    &self,
    store: &CacheStore,
    resource: ResourceName,
    kind: MutationKind,
    response: &Value,
    request: &Value,
  ) -> usize {
    self
      .keys_for(resource, kind, response, request)
      .iter()
      .map(|pattern| store.invalidate(pattern))
      .sum()
  }
}

/// Read an id-like field by dotted path. Strings must be non-empty; numbers
/// are rendered as text.
pub fn field(value: &Value, path: &str) -> Option<String> {
  let mut current = value;
  for segment in path.split('.') {
    current = current.get(segment)?;
  }
  match current {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// First of several candidate paths that yields a value. Backends populate
/// foreign keys either flat (`studentId`) or as embedded objects
/// (`student.id`).
pub fn first_field(value: &Value, paths: &[&str]) -> Option<String> {
  paths.iter().find_map(|path| field(value, path))
}

/// `field` on the response, falling back to the request.
pub fn response_or_request(response: &Value, request: &Value, paths: &[&str]) -> Option<String> {
  first_field(response, paths).or_else(|| first_field(request, paths))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::keys;
  use serde_json::json;

  fn owner_rule(response: &Value, _request: &Value) -> Vec<CacheKey> {
    match field(response, "ownerId") {
      Some(id) => vec![keys::detail("owners", &id), keys::lists("owners")],
      None => Vec::new(),
    }
  }

  fn duplicate_rule(_response: &Value, _request: &Value) -> Vec<CacheKey> {
    vec![keys::lists("owners")]
  }

  #[test]
  fn test_keys_for_dedupes_and_skips_missing_fields() {
    let mut graph = RelationGraph::new();
    graph
      .on("pets", &[MutationKind::Create, MutationKind::Update], "owner", owner_rule)
      .register("pets", MutationKind::Create, "owner lists", duplicate_rule);

    let produced = graph.keys_for("pets", MutationKind::Create, &json!({"ownerId": 7}), &Value::Null);
    assert_eq!(produced, vec![keys::detail("owners", "7"), keys::lists("owners")]);

    let skipped = graph.keys_for("pets", MutationKind::Update, &json!({}), &Value::Null);
    assert!(skipped.is_empty());

    assert!(graph.keys_for("pets", MutationKind::Delete, &json!({"ownerId": 7}), &Value::Null).is_empty());
    assert_eq!(graph.len(), 3);
  }

  #[test]
  fn test_apply_invalidates_store() {
    let mut graph = RelationGraph::new();
    graph.register("pets", MutationKind::Custom("adopt"), "owner", owner_rule);
    let store = CacheStore::new();
    store.overwrite(&keys::detail("owners", "7"), json!({"id": 7}));
    store.overwrite(&keys::detail("owners", "8"), json!({"id": 8}));

    let count = graph.apply(
      &store,
      "pets",
      MutationKind::Custom("adopt"),
      &json!({"ownerId": "7"}),
      &Value::Null,
    );

    assert_eq!(count, 1);
    assert_eq!(store.status(&keys::detail("owners", "8")).map(|s| s.fresh), Some(true));
  }

  #[test]
  fn test_field_paths() {
    let value = json!({"studentFee": {"_id": "F1"}, "studentId": "", "amount": 500});
    assert_eq!(field(&value, "studentFee._id"), Some("F1".to_string()));
    assert_eq!(field(&value, "studentId"), None);
    assert_eq!(field(&value, "amount"), Some("500".to_string()));
    assert_eq!(
      first_field(&value, &["studentFeeId", "studentFee.id", "studentFee._id"]),
      Some("F1".to_string())
    );
    assert_eq!(
      response_or_request(&json!({}), &json!({"studentId": "S1"}), &["studentId"]),
      Some("S1".to_string())
    );
  }
}
