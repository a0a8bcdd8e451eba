/* src/client/rust/src/error.rs */

use serde_json::Value;

/// Failure of one client call. Cloneable so a shared round trip can fail
/// every call it carried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
  /// The server answered with an error envelope.
  #[error("{code}: {message}")]
  Rpc { code: String, message: String, transient: bool, status: u16 },
  #[error("transport failed: {0}")]
  Transport(String),
  #[error("malformed response: {0}")]
  Protocol(String),
}

impl ClientError {
  pub(crate) fn from_envelope(error: &Value, status: u16) -> Self {
    let text = |key: &str| error.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    Self::Rpc {
      code: text("code"),
      message: text("message"),
      transient: error.get("transient").and_then(Value::as_bool).unwrap_or(false),
      status,
    }
  }

  /// Error code for server errors.
  pub fn code(&self) -> Option<&str> {
    match self {
      Self::Rpc { code, .. } => Some(code.as_str()),
      _ => None,
    }
  }

  /// Whether retrying may succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Rpc { transient, .. } => *transient,
      Self::Transport(_) => true,
      Self::Protocol(_) => false,
    }
  }
}
