/* src/server/core/rust/src/errors.rs */

use std::fmt;

use serde::Serialize;

/// Known error codes plus an open-ended custom code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
  Validation,
  Unauthorized,
  Forbidden,
  NotFound,
  RateLimited,
  Internal,
  Custom(String),
}

impl ErrorCode {
  pub fn parse(code: &str) -> Self {
    match code {
      "VALIDATION_ERROR" => Self::Validation,
      "UNAUTHORIZED" => Self::Unauthorized,
      "FORBIDDEN" => Self::Forbidden,
      "NOT_FOUND" => Self::NotFound,
      "RATE_LIMITED" => Self::RateLimited,
      "INTERNAL_ERROR" => Self::Internal,
      other => Self::Custom(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Validation => "VALIDATION_ERROR",
      Self::Unauthorized => "UNAUTHORIZED",
      Self::Forbidden => "FORBIDDEN",
      Self::NotFound => "NOT_FOUND",
      Self::RateLimited => "RATE_LIMITED",
      Self::Internal => "INTERNAL_ERROR",
      Self::Custom(code) => code,
    }
  }

  pub fn default_status(&self) -> u16 {
    match self {
      Self::Validation => 400,
      Self::Unauthorized => 401,
      Self::Forbidden => 403,
      Self::NotFound => 404,
      Self::RateLimited => 429,
      Self::Internal | Self::Custom(_) => 500,
    }
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for ErrorCode {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

/// Error carried by the RPC envelope: `{ok:false, error:{code,message,transient}}`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct WeftError {
  code: ErrorCode,
  message: String,
  status: u16,
  transient: bool,
}

/// Wire shape of [`WeftError`]; the status travels on the response, not in the body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody<'a> {
  pub code: &'a str,
  pub message: &'a str,
  pub transient: bool,
}

impl WeftError {
  /// Explicit status always wins over the code table.
  pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
    Self { code: ErrorCode::parse(&code.into()), message: message.into(), status, transient: false }
  }

  pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self::from_code(ErrorCode::parse(&code.into()), message)
  }

  pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
    let status = code.default_status();
    Self { code, message: message.into(), status, transient: false }
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    Self::from_code(ErrorCode::Validation, msg)
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    Self::from_code(ErrorCode::NotFound, msg)
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Self::from_code(ErrorCode::Internal, msg)
  }

  pub fn unauthorized(msg: impl Into<String>) -> Self {
    Self::from_code(ErrorCode::Unauthorized, msg)
  }

  pub fn forbidden(msg: impl Into<String>) -> Self {
    Self::from_code(ErrorCode::Forbidden, msg)
  }

  pub fn rate_limited(msg: impl Into<String>) -> Self {
    Self::from_code(ErrorCode::RateLimited, msg).transient(true)
  }

  /// Mark the failure as retryable by the client.
  pub fn transient(mut self, transient: bool) -> Self {
    self.transient = transient;
    self
  }

  pub fn with_status(mut self, status: u16) -> Self {
    self.status = status;
    self
  }

  pub fn code(&self) -> &str {
    self.code.as_str()
  }

  pub fn error_code(&self) -> &ErrorCode {
    &self.code
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  pub fn is_transient(&self) -> bool {
    self.transient
  }

  pub fn body(&self) -> ErrorBody<'_> {
    ErrorBody { code: self.code.as_str(), message: &self.message, transient: self.transient }
  }

  /// `{ok:false, error:{...}}`
  pub fn to_envelope(&self) -> serde_json::Value {
    serde_json::json!({ "ok": false, "error": self.body() })
  }
}

impl From<serde_json::Error> for WeftError {
  fn from(err: serde_json::Error) -> Self {
    Self::internal(err.to_string())
  }
}
