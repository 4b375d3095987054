//! Cache-aware client for a multi-tenant school administration backend.
//!
//! Reads go through a shared [`cache::CacheStore`]; writes invalidate what
//! they make stale, including derived views on other resources.

pub mod api;
pub mod cache;
pub mod config;
pub mod query;
pub mod school;
