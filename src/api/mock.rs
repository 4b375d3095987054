//! Scripted in-memory transport for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::Method;
use serde_json::Value;

use super::error::{ApiError, ApiResult};
use super::transport::{ApiRequest, Transport};

type Handler = Arc<dyn Fn(&ApiRequest) -> ApiResult<Value> + Send + Sync>;

/// Transport answering from a route table and recording every request.
#[derive(Clone, Default)]
pub struct MockTransport {
  routes: Arc<Mutex<HashMap<(Method, String), Handler>>>,
  log: Arc<Mutex<Vec<ApiRequest>>>,
  delay: Option<Duration>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every response, to keep requests in flight.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Answer `method path` with the handler's result. Replaces any previous
  /// handler for the route.
  pub fn route<F>(&self, method: Method, path: &str, handler: F)
  where
    F: Fn(&ApiRequest) -> ApiResult<Value> + Send + Sync + 'static,
  {
    self
      .routes
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert((method, path.to_string()), Arc::new(handler));
  }

  /// Answer `method path` with a fixed JSON value.
  pub fn respond(&self, method: Method, path: &str, value: Value) {
    self.route(method, path, move |_| Ok(value.clone()));
  }

  /// All requests received so far.
  pub fn requests(&self) -> Vec<ApiRequest> {
    self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Number of requests received for `method path`.
  pub fn count(&self, method: Method, path: &str) -> usize {
    self
      .requests()
      .iter()
      .filter(|r| r.method == method && r.path == path)
      .count()
  }
}

impl Transport for MockTransport {
  fn request(&self, request: ApiRequest) -> BoxFuture<'static, ApiResult<Value>> {
    self
      .log
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(request.clone());
    let handler = self
      .routes
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&(request.method.clone(), request.path.clone()))
      .cloned();
    let delay = self.delay;

    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      match handler {
        Some(handler) => handler(&request),
        None => Err(ApiError::NotFound(format!("{} {}", request.method, request.path))),
      }
    }
    .boxed()
  }
}
