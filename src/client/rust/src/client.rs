/* src/client/rust/src/client.rs */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::transport::{HttpTransport, Transport, WireResponse};

/// Batch endpoint name when no wire-name map is configured.
pub const BATCH_ENDPOINT: &str = "_batch";

/// Logical-to-obfuscated names, as emitted by the build.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct WireNames {
  pub batch: String,
  pub procedures: HashMap<String, String>,
}

struct Pending {
  wire: String,
  input: Value,
  reply: oneshot::Sender<Result<Value, ClientError>>,
}

/// Calls issued before the client's flush task runs share one round trip.
#[derive(Clone)]
pub struct RpcClient {
  transport: Arc<dyn Transport>,
  wire_names: Option<Arc<WireNames>>,
  queue: Arc<Mutex<Vec<Pending>>>,
}

impl RpcClient {
  pub fn new(transport: impl Transport) -> Self {
    Self { transport: Arc::new(transport), wire_names: None, queue: Arc::default() }
  }

  pub fn http(base_url: impl Into<String>) -> Self {
    Self::new(HttpTransport::new(base_url))
  }

  pub fn with_wire_names(mut self, names: WireNames) -> Self {
    self.wire_names = Some(Arc::new(names));
    self
  }

  fn wire_name(&self, name: &str) -> String {
    self
      .wire_names
      .as_ref()
      .and_then(|names| names.procedures.get(name))
      .map_or_else(|| name.to_string(), Clone::clone)
  }

  fn batch_endpoint(&self) -> &str {
    self.wire_names.as_ref().map_or(BATCH_ENDPOINT, |names| names.batch.as_str())
  }

  /// Queue a call. Needs a tokio runtime for the flush task.
  pub async fn call(&self, name: &str, input: Value) -> Result<Value, ClientError> {
    let (reply, rx) = oneshot::channel();
    let first = {
      let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
      queue.push(Pending { wire: self.wire_name(name), input, reply });
      queue.len() == 1
    };
    if first {
      let client = self.clone();
      tokio::spawn(async move {
        tokio::task::yield_now().await;
        client.flush().await;
      });
    }
    rx.await.map_err(|_| ClientError::Transport("call dropped before a reply arrived".to_string()))?
  }

  pub async fn call_as<I, O>(&self, name: &str, input: &I) -> Result<O, ClientError>
  where
    I: Serialize,
    O: DeserializeOwned,
  {
    let input = serde_json::to_value(input).map_err(|e| ClientError::Protocol(e.to_string()))?;
    let data = self.call(name, input).await?;
    serde_json::from_value(data).map_err(|e| ClientError::Protocol(e.to_string()))
  }

  async fn flush(&self) {
    let pending = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
    if pending.len() == 1 {
      if let Some(call) = pending.into_iter().next() {
        let result = self.transport.post(&call.wire, call.input).await.and_then(unwrap_envelope);
        let _ = call.reply.send(result);
      }
      return;
    }
    if pending.is_empty() {
      return;
    }

    tracing::debug!(calls = pending.len(), "flushing batch");
    let calls: Vec<Value> = pending
      .iter()
      .map(|p| serde_json::json!({ "procedure": p.wire, "input": p.input }))
      .collect();
    let body = serde_json::json!({ "calls": calls });
    let outcome = self
      .transport
      .post(self.batch_endpoint(), body)
      .await
      .and_then(unwrap_envelope)
      .and_then(|data| split_results(data, pending.len()));

    match outcome {
      Ok(results) => {
        for (call, result) in pending.into_iter().zip(results) {
          let _ = call.reply.send(result);
        }
      }
      Err(err) => {
        tracing::warn!(error = %err, "batch request failed");
        for call in pending {
          let _ = call.reply.send(Err(err.clone()));
        }
      }
    }
  }
}

fn unwrap_envelope(response: WireResponse) -> Result<Value, ClientError> {
  let WireResponse { status, mut body } = response;
  match body.get("ok").and_then(Value::as_bool) {
    Some(true) => Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null)),
    Some(false) => Err(ClientError::from_envelope(&body["error"], status)),
    None => Err(ClientError::Protocol(format!("status {status}: missing `ok` flag"))),
  }
}

/// Per-call outcomes of a batch, by position.
fn split_results(data: Value, expected: usize) -> Result<Vec<Result<Value, ClientError>>, ClientError> {
  let Value::Object(mut data) = data else {
    return Err(ClientError::Protocol("batch data is not an object".to_string()));
  };
  let Some(Value::Array(results)) = data.remove("results") else {
    return Err(ClientError::Protocol("batch data has no results".to_string()));
  };
  if results.len() != expected {
    return Err(ClientError::Protocol(format!(
      "expected {expected} batch results, got {}",
      results.len()
    )));
  }
  Ok(results.into_iter().map(|item| unwrap_envelope(WireResponse { status: 200, body: item })).collect())
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use futures_util::future::BoxFuture;
  use serde_json::json;

  use super::*;

  type Seen = Arc<Mutex<Vec<(String, Value)>>>;

  /// Echoes inputs back; procedures named `fail` (or their wire name `f`) error.
  struct Echo {
    seen: Seen,
  }

  fn outcome(name: &str, input: &Value) -> Value {
    if name == "fail" || name == "f" {
      json!({"ok": false, "error": {"code": "NOT_FOUND", "message": "gone", "transient": false}})
    } else {
      json!({"ok": true, "data": input})
    }
  }

  impl Transport for Echo {
    fn post(&self, endpoint: &str, body: Value) -> BoxFuture<'_, Result<WireResponse, ClientError>> {
      self.seen.lock().unwrap().push((endpoint.to_string(), body.clone()));
      let response = match body.get("calls").and_then(Value::as_array) {
        Some(calls) => {
          let results: Vec<Value> = calls
            .iter()
            .map(|c| outcome(c["procedure"].as_str().unwrap_or_default(), &c["input"]))
            .collect();
          json!({"ok": true, "data": {"results": results}})
        }
        None => outcome(endpoint, &body),
      };
      let status = if response["ok"] == true { 200 } else { 404 };
      Box::pin(async move { Ok(WireResponse { status, body: response }) })
    }
  }

  struct Down;

  impl Transport for Down {
    fn post(&self, _endpoint: &str, _body: Value) -> BoxFuture<'_, Result<WireResponse, ClientError>> {
      Box::pin(async { Err(ClientError::Transport("connection refused".to_string())) })
    }
  }

  fn echo() -> (RpcClient, Seen) {
    let seen: Seen = Arc::default();
    (RpcClient::new(Echo { seen: seen.clone() }), seen)
  }

  #[tokio::test]
  async fn single_call_uses_procedure_endpoint() {
    let (client, seen) = echo();
    let data = client.call("greet", json!({"name": "a"})).await.unwrap();
    assert_eq!(data, json!({"name": "a"}));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "greet");
  }

  #[tokio::test]
  async fn concurrent_calls_share_one_batch() {
    let (client, seen) = echo();
    let (a, b, c) = tokio::join!(
      client.call("greet", json!(1)),
      client.call("fail", json!(2)),
      client.call("greet", json!(3)),
    );
    assert_eq!(a.unwrap(), json!(1));
    let err = b.unwrap_err();
    assert_eq!(err.code(), Some("NOT_FOUND"));
    assert!(!err.is_transient());
    assert_eq!(c.unwrap(), json!(3));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, BATCH_ENDPOINT);
    assert_eq!(seen[0].1["calls"][1], json!({"procedure": "fail", "input": 2}));
  }

  #[tokio::test]
  async fn sequential_calls_are_separate_round_trips() {
    let (client, seen) = echo();
    client.call("greet", json!(1)).await.unwrap();
    client.call("greet", json!(2)).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn wire_names_are_substituted() {
    let (client, seen) = echo();
    let client = client.with_wire_names(WireNames {
      batch: "b".to_string(),
      procedures: [("greet".to_string(), "g".to_string()), ("fail".to_string(), "f".to_string())]
        .into_iter()
        .collect(),
    });
    let (a, b) = tokio::join!(client.call("greet", json!(1)), client.call("other", json!(2)));
    assert_eq!(a.unwrap(), json!(1));
    assert_eq!(b.unwrap(), json!(2));
    let err = client.call("fail", json!(null)).await.unwrap_err();
    assert_eq!(err, ClientError::Rpc {
      code: "NOT_FOUND".into(),
      message: "gone".into(),
      transient: false,
      status: 404
    });

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "b");
    assert_eq!(seen[0].1["calls"][0]["procedure"], "g");
    assert_eq!(seen[0].1["calls"][1]["procedure"], "other");
    assert_eq!(seen[1].0, "f");
  }

  #[tokio::test]
  async fn transport_failure_reaches_every_call() {
    let client = RpcClient::new(Down);
    let (a, b) = tokio::join!(client.call("x", json!(1)), client.call("y", json!(2)));
    assert!(matches!(a, Err(ClientError::Transport(_))));
    assert!(matches!(b, Err(ClientError::Transport(_))));
  }

  #[tokio::test]
  async fn typed_calls() {
    #[derive(Serialize)]
    struct In {
      n: u32,
    }
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Out {
      n: u32,
    }
    let (client, _) = echo();
    let out: Out = client.call_as("echo", &In { n: 7 }).await.unwrap();
    assert_eq!(out, Out { n: 7 });
  }

  #[test]
  fn mismatched_batch_length_is_protocol_error() {
    let err = split_results(json!({"results": [{"ok": true, "data": 1}]}), 2).unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
  }
}
