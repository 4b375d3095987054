//! Client-side resource cache.
//!
//! This module provides a resource-agnostic caching mechanism that:
//! - Addresses every read result by a hierarchical, value-equal key
//! - Coalesces concurrent reads of the same key into one request
//! - Marks entries stale after writes (invalidation) or drops them (eviction)
//! - Propagates writes to other resources through a rule registry
//! - Reconciles bulk endpoints item by item

mod bulk;
mod key;
mod relations;
mod resource;
mod store;
mod traits;

pub use bulk::{BulkFailure, BulkResult};
pub use key::{keys, CacheKey, Filters, KeyPart, ResourceName, DETAIL_SCOPE, LIST_SCOPE};
pub use relations::{field, first_field, response_or_request, MutationKind, RelationGraph, Rule, RuleFn};
pub use resource::{ListQuery, ResourceCache};
pub use store::{CacheEntry, CacheStore, EntryStatus, StatsSnapshot};
pub use traits::{CacheResult, CacheSource, Entity};
