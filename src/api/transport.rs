//! JSON-over-HTTP transport.
//!
//! The cache layer only needs `request(method, path, params, body) -> JSON`.
//! Authentication and tenant headers are the transport's business.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{header, Client, Method};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::error::{ApiError, ApiResult};
use crate::config::ApiConfig;

/// Header carrying the tenant (school) the request is scoped to.
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// One request against the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub params: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      params: Vec::new(),
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::PUT, path)
  }

  pub fn patch(path: impl Into<String>) -> Self {
    Self::new(Method::PATCH, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn params(mut self, params: Vec<(String, String)>) -> Self {
    self.params = params;
    self
  }

  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }
}

/// Anything that can carry an [`ApiRequest`] to the backend.
///
/// Implementations own retries, if any; callers above this trait never
/// retry.
pub trait Transport: Send + Sync {
  fn request(&self, request: ApiRequest) -> BoxFuture<'static, ApiResult<Value>>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
  base_url: Url,
  token: Option<String>,
  tenant: Option<String>,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig, token: Option<String>) -> ApiResult<Self> {
    // A trailing slash makes Url::join append instead of replacing the last segment.
    let mut base = config.url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url =
      Url::parse(&base).map_err(|e| ApiError::Config(format!("invalid API url {}: {}", config.url, e)))?;

    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;

    Ok(Self {
      client,
      base_url,
      token,
      tenant: config.tenant.clone(),
    })
  }

  fn url_for(&self, path: &str) -> ApiResult<Url> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::Config(format!("invalid request path {}: {}", path, e)))
  }
}

impl Transport for HttpTransport {
  fn request(&self, request: ApiRequest) -> BoxFuture<'static, ApiResult<Value>> {
    let this = self.clone();
    async move {
      let url = this.url_for(&request.path)?;
      debug!(method = %request.method, %url, "request");

      let mut builder = this
        .client
        .request(request.method.clone(), url)
        .header(header::ACCEPT, "application/json");
      if !request.params.is_empty() {
        builder = builder.query(&request.params);
      }
      if let Some(token) = &this.token {
        builder = builder.bearer_auth(token);
      }
      if let Some(tenant) = &this.tenant {
        builder = builder.header(TENANT_HEADER, tenant);
      }
      if let Some(body) = &request.body {
        builder = builder.json(body);
      }

      let response = builder.send().await?;
      let status = response.status();
      let text = response.text().await?;
      if !status.is_success() {
        return Err(ApiError::from_status(status, &text));
      }
      if text.trim().is_empty() {
        return Ok(Value::Null);
      }
      Ok(serde_json::from_str(&text)?)
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(url: &str) -> ApiConfig {
    ApiConfig {
      url: url.to_string(),
      tenant: Some("school-1".to_string()),
      timeout_secs: 5,
    }
  }

  #[test]
  fn test_paths_join_under_base() {
    let transport = HttpTransport::new(&config("https://api.example.com/v1"), None).unwrap();
    assert_eq!(
      transport.url_for("/students/S1").unwrap().as_str(),
      "https://api.example.com/v1/students/S1"
    );
    assert_eq!(
      transport.url_for("fee-payments/bulk").unwrap().as_str(),
      "https://api.example.com/v1/fee-payments/bulk"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(matches!(
      HttpTransport::new(&config("not a url"), None),
      Err(ApiError::Config(_))
    ));
  }

  #[test]
  fn test_request_builders() {
    let request = ApiRequest::patch("/leaves/L1/approve")
      .params(vec![("year".into(), "2024".into())])
      .body(serde_json::json!({"note": "ok"}));
    assert_eq!(request.method, Method::PATCH);
    assert_eq!(request.params.len(), 1);
    assert!(request.body.is_some());
  }
}
