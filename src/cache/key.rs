//! Hierarchical cache keys shared by every resource.
//!
//! A key is an ordered tuple `[resource, scope, ...qualifiers]`. Keys compare
//! by value, so two requests with the same resource, scope and qualifiers
//! always address the same entry.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

/// Unique tag identifying a family of cached data (e.g. `"students"`).
pub type ResourceName = &'static str;

pub const LIST_SCOPE: &str = "list";
pub const DETAIL_SCOPE: &str = "detail";

/// Normalized filter parameters for a list query.
///
/// Keys are kept sorted and `null` values are dropped on insertion, so
/// `{a: 1, b: null}` and `{a: 1}` are the same filter set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filters(BTreeMap<String, Value>);

impl Filters {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a filter. `null` values are treated as absent.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(key, value);
    self
  }

  /// Add a filter only when a value is present.
  pub fn with_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
    match value {
      Some(v) => self.with(key, v),
      None => self,
    }
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    let key = key.into();
    match value.into() {
      Value::Null => {
        self.0.remove(&key);
      }
      value => {
        self.0.insert(key, value);
      }
    }
  }

  /// Build filters from a JSON object, dropping `null` members.
  /// Non-object values produce an empty filter set.
  pub fn from_json(value: &Value) -> Self {
    let mut filters = Self::new();
    if let Value::Object(map) = value {
      for (k, v) in map {
        filters.insert(k.clone(), v.clone());
      }
    }
    filters
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }

  /// True when every filter in `self` is also present, with the same value,
  /// in `other`.
  pub fn is_subset_of(&self, other: &Filters) -> bool {
    self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
  }

  /// Render as query-string pairs. Strings are sent raw, everything else as
  /// its JSON text.
  pub fn to_params(&self) -> Vec<(String, String)> {
    self
      .0
      .iter()
      .map(|(k, v)| {
        let rendered = match v {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        (k.clone(), rendered)
      })
      .collect()
  }
}

impl Hash for Filters {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.0.len().hash(state);
    for (k, v) in &self.0 {
      k.hash(state);
      // serde_json::Value has no Hash impl; its JSON text is canonical here
      // because maps are ordered.
      v.to_string().hash(state);
    }
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut filters = Filters::new();
    for (k, v) in iter {
      filters.insert(k, v);
    }
    filters
  }
}

/// One element of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
  Segment(String),
  Filters(Filters),
}

impl KeyPart {
  /// Pattern matching: segments must be equal, a filter pattern matches any
  /// filter set that contains it.
  fn matches(&self, pattern: &KeyPart) -> bool {
    match (self, pattern) {
      (KeyPart::Segment(a), KeyPart::Segment(b)) => a == b,
      (KeyPart::Filters(actual), KeyPart::Filters(wanted)) => wanted.is_subset_of(actual),
      _ => false,
    }
  }
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPart::Segment(s) => f.write_str(s),
      KeyPart::Filters(filters) => {
        let rendered = serde_json::to_string(filters).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
      }
    }
  }
}

/// Immutable, value-comparable cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
  fn from_parts(parts: Vec<KeyPart>) -> Self {
    Self(parts)
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  /// The resource this key belongs to.
  pub fn resource(&self) -> Option<&str> {
    match self.0.first() {
      Some(KeyPart::Segment(s)) => Some(s),
      _ => None,
    }
  }

  pub fn is_list(&self) -> bool {
    matches!(self.0.get(1), Some(KeyPart::Segment(s)) if s == LIST_SCOPE)
  }

  pub fn is_detail(&self) -> bool {
    matches!(self.0.get(1), Some(KeyPart::Segment(s)) if s == DETAIL_SCOPE)
  }

  /// Filters of a list key, if any.
  pub fn filters(&self) -> Option<&Filters> {
    match self.0.get(2) {
      Some(KeyPart::Filters(filters)) if self.is_list() => Some(filters),
      _ => None,
    }
  }

  /// Structural prefix test.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    prefix.0.len() <= self.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
  }

  /// Prefix test where a filter part in `pattern` matches any superset of
  /// those filters at the same position.
  pub fn matches(&self, pattern: &CacheKey) -> bool {
    pattern.0.len() <= self.0.len() && self.0.iter().zip(&pattern.0).all(|(a, b)| a.matches(b))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, part) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str("/")?;
      }
      write!(f, "{}", part)?;
    }
    Ok(())
  }
}

/// Key constructors. Callers never assemble keys by hand.
pub mod keys {
  use super::*;

  fn segment(s: impl Into<String>) -> KeyPart {
    KeyPart::Segment(s.into())
  }

  /// `[resource]`
  pub fn all(resource: &str) -> CacheKey {
    CacheKey::from_parts(vec![segment(resource)])
  }

  /// `[resource, "list"]`
  pub fn lists(resource: &str) -> CacheKey {
    CacheKey::from_parts(vec![segment(resource), segment(LIST_SCOPE)])
  }

  /// `[resource, "list", filters]`
  pub fn list(resource: &str, filters: &Filters) -> CacheKey {
    CacheKey::from_parts(vec![
      segment(resource),
      segment(LIST_SCOPE),
      KeyPart::Filters(filters.clone()),
    ])
  }

  /// `[resource, "detail"]`
  pub fn details(resource: &str) -> CacheKey {
    CacheKey::from_parts(vec![segment(resource), segment(DETAIL_SCOPE)])
  }

  /// `[resource, "detail", id]`
  pub fn detail(resource: &str, id: &str) -> CacheKey {
    CacheKey::from_parts(vec![segment(resource), segment(DETAIL_SCOPE), segment(id)])
  }

  /// `[resource, "detail", id, view]` for read-only sub-views of one entity
  /// (a printable receipt, for instance). Lives under the entity's detail
  /// key, so evicting the detail also drops its views.
  pub fn detail_view(resource: &str, id: &str, view: &str) -> CacheKey {
    CacheKey::from_parts(vec![
      segment(resource),
      segment(DETAIL_SCOPE),
      segment(id),
      segment(view),
    ])
  }
}

#[cfg(test)]
mod tests {
  use super::keys::*;
  use super::*;
  use serde_json::json;
  use std::collections::HashSet;

  #[test]
  fn test_list_keys_ignore_null_and_order() {
    let a = Filters::from_json(&json!({"classId": "C1", "section": null, "page": 2}));
    let b = Filters::new().with("page", 2).with("classId", "C1");
    assert_eq!(list("students", &a), list("students", &b));

    let mut set = HashSet::new();
    set.insert(list("students", &a));
    assert!(set.contains(&list("students", &b)));
  }

  #[test]
  fn test_filter_value_types_are_distinct() {
    let numeric = Filters::new().with("year", 2024);
    let text = Filters::new().with("year", "2024");
    assert_ne!(list("leaves", &numeric), list("leaves", &text));
  }

  #[test]
  fn test_with_opt_skips_none() {
    let filters = Filters::new().with_opt::<String>("studentId", None);
    assert!(filters.is_empty());
    assert_eq!(list("fees", &filters), list("fees", &Filters::new()));
  }

  #[test]
  fn test_hierarchy() {
    let key = detail("students", "S1");
    assert!(key.starts_with(&all("students")));
    assert!(key.starts_with(&details("students")));
    assert!(!key.starts_with(&lists("students")));
    assert!(detail_view("feePayments", "P1", "receipt").starts_with(&detail("feePayments", "P1")));
    assert!(!detail("students", "S10").starts_with(&detail("students", "S1")));
  }

  #[test]
  fn test_filter_pattern_matching() {
    let scoped = list("studentFees", &Filters::new().with("studentId", "S1").with("status", "due"));
    let pattern = list("studentFees", &Filters::new().with("studentId", "S1"));
    let other = list("studentFees", &Filters::new().with("studentId", "S2"));

    assert!(scoped.matches(&pattern));
    assert!(!other.matches(&pattern));
    assert!(!scoped.starts_with(&pattern));
    assert!(scoped.matches(&lists("studentFees")));
  }

  #[test]
  fn test_accessors_and_display() {
    let filters = Filters::new().with("studentId", "S1");
    let key = list("studentFees", &filters);
    assert_eq!(key.resource(), Some("studentFees"));
    assert!(key.is_list());
    assert_eq!(key.filters(), Some(&filters));
    assert_eq!(key.to_string(), r#"studentFees/list/{"studentId":"S1"}"#);
    assert!(detail("students", "S1").is_detail());
  }

  #[test]
  fn test_params_render_strings_raw() {
    let filters = Filters::new().with("isActive", true).with("studentId", "S1");
    assert_eq!(
      filters.to_params(),
      vec![
        ("isActive".to_string(), "true".to_string()),
        ("studentId".to_string(), "S1".to_string()),
      ]
    );
  }
}
