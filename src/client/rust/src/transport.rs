/* src/client/rust/src/transport.rs */

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::ClientError;

/// Raw reply to one POST.
#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
  pub status: u16,
  pub body: Value,
}

/// Sends one JSON body to a named endpoint.
pub trait Transport: Send + Sync + 'static {
  fn post(&self, endpoint: &str, body: Value) -> BoxFuture<'_, Result<WireResponse, ClientError>>;
}

/// POSTs to `{base_url}/{endpoint}`.
pub struct HttpTransport {
  http: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self::with_client(reqwest::Client::new(), base_url)
  }

  pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
    Self { http, base_url: base_url.into() }
  }
}

impl Transport for HttpTransport {
  fn post(&self, endpoint: &str, body: Value) -> BoxFuture<'_, Result<WireResponse, ClientError>> {
    let url = format!("{}/{endpoint}", self.base_url.trim_end_matches('/'));
    Box::pin(async move {
      let response = self
        .http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
      let status = response.status().as_u16();
      let body = response
        .json::<Value>()
        .await
        .map_err(|e| ClientError::Protocol(format!("status {status}: {e}")))?;
      Ok(WireResponse { status, body })
    })
  }
}
