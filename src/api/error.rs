use std::sync::Arc;

use thiserror::Error;

/// Errors raised by the transport and entity services.
///
/// The type is `Clone` so one coalesced fetch can hand the same failure to
/// every reader waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
  #[error("Access denied: {0}")]
  AccessDenied(String),

  #[error("Unauthorized - token may be expired")]
  Unauthorized,

  #[error("Resource not found: {0}")]
  NotFound(String),

  #[error("Rate limited - please wait before retrying")]
  RateLimited,

  #[error("Server error: {0}")]
  ServerError(String),

  #[error("Network error: {0}")]
  Network(Arc<reqwest::Error>),

  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("Failed to decode response: {0}")]
  Decode(Arc<serde_json::Error>),

  #[error("Invalid client configuration: {0}")]
  Config(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      return body.to_string();
    }
    let mut cut = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(cut) {
      cut -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
  }

  pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
    let truncated = Self::truncate_body(body);
    match status.as_u16() {
      401 => ApiError::Unauthorized,
      403 => ApiError::AccessDenied(truncated),
      404 => ApiError::NotFound(truncated),
      429 => ApiError::RateLimited,
      500..=599 => ApiError::ServerError(truncated),
      _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    ApiError::Network(Arc::new(err))
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    ApiError::Decode(Arc::new(err))
  }
}
