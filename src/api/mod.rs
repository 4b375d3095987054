//! REST access to the school administration backend.
//!
//! `Transport` carries JSON requests (auth and tenant headers included);
//! `EntityService` binds a resource's base path to it.

pub mod error;
#[cfg(test)]
pub mod mock;
pub mod service;
pub mod transport;

pub use error::{ApiError, ApiResult};
#[cfg(test)]
pub use mock::MockTransport;
pub use service::{EntityService, IdFn};
pub use transport::{ApiRequest, HttpTransport, Transport};
