/* src/server/core/rust/src/channel.rs */

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::Value;

use crate::errors::WeftError;
use crate::manifest::Ordered;
use crate::procedure::{BoxFuture, BoxStream, Handler, HandlerFn, ProcedureCtx, ProcedureDef};
use crate::procedure::{ProcedureKind, SubscriptionHandlerFn};
use crate::schema::{Field, SchemaNode};
use crate::subscription::{Cleanup, EventSink, PushSource};

/// Tag field of outgoing channel events.
pub const EVENT_TAG: &str = "type";

/// One client-to-server message of a channel.
pub struct IncomingDef {
  pub input: SchemaNode,
  pub output: SchemaNode,
  pub error: Option<SchemaNode>,
  pub handler: HandlerFn,
}

impl IncomingDef {
  pub fn new<F, Fut>(input: SchemaNode, output: SchemaNode, f: F) -> Self
  where
    F: Fn(Value, ProcedureCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WeftError>> + Send + 'static,
  {
    let handler: HandlerFn =
      Arc::new(move |input: Value, ctx: ProcedureCtx| -> BoxFuture<Result<Value, WeftError>> {
        Box::pin(f(input, ctx))
      });
    Self { input, output, error: None, handler }
  }

  pub fn with_error(mut self, error: SchemaNode) -> Self {
    self.error = Some(error);
    self
  }
}

/// An outgoing event produced by a channel stream.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
  pub event: String,
  pub payload: Value,
}

impl ChannelEvent {
  pub fn new(event: impl Into<String>, payload: Value) -> Self {
    Self { event: event.into(), payload }
  }
}

/// Typed write side of a channel subscription. Only events declared on the
/// channel can be sent; each goes out as `{type, payload}`.
#[derive(Clone)]
pub struct ChannelEmitter {
  table: Arc<HashMap<String, SchemaNode>>,
  sink: EventSink,
}

impl ChannelEmitter {
  /// `Ok(false)` when the subscriber is already gone.
  pub fn emit(&self, event: &str, payload: Value) -> Result<bool, WeftError> {
    if !self.table.contains_key(event) {
      return Err(WeftError::internal(format!("Undeclared channel event '{event}'")));
    }
    Ok(self.sink.emit(serde_json::json!({ EVENT_TAG: event, "payload": payload })))
  }

  pub fn declares(&self, event: &str) -> bool {
    self.table.contains_key(event)
  }

  pub fn payload_schema(&self, event: &str) -> Option<&SchemaNode> {
    self.table.get(event)
  }

  pub fn error(&self, err: WeftError) {
    self.sink.error(err);
  }

  pub fn complete(&self) {
    self.sink.complete();
  }

  pub fn is_closed(&self) -> bool {
    self.sink.is_closed()
  }
}

/// Push source for a channel's event stream.
pub struct ChannelSource(Box<dyn FnOnce(ChannelEmitter) -> Cleanup + Send>);

impl ChannelSource {
  pub fn new<F, C>(start: F) -> Self
  where
    F: FnOnce(ChannelEmitter) -> C + Send + 'static,
    C: FnOnce() + Send + 'static,
  {
    Self(Box::new(move |emitter| Box::new(start(emitter)) as Cleanup))
  }

  /// Forward a stream of events; an undeclared event ends the stream with an error.
  pub fn from_stream(stream: BoxStream<Result<ChannelEvent, WeftError>>) -> Self {
    Self::new(move |emitter: ChannelEmitter| {
      let task = tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
          let outcome = item.and_then(|ev| emitter.emit(&ev.event, ev.payload));
          match outcome {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
              emitter.error(err);
              return;
            }
          }
        }
        emitter.complete();
      });
      move || task.abort()
    })
  }
}

pub type ChannelSubscribeFn =
  Arc<dyn Fn(Value, ProcedureCtx) -> BoxFuture<Result<ChannelSource, WeftError>> + Send + Sync>;

/// A bidirectional channel: incoming messages become commands, outgoing
/// events share one subscription.
pub struct ChannelDef {
  pub name: String,
  pub input: SchemaNode,
  pub incoming: Vec<(String, IncomingDef)>,
  pub outgoing: Vec<(String, SchemaNode)>,
  pub subscribe: ChannelSubscribeFn,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomingMeta {
  pub input: SchemaNode,
  pub output: SchemaNode,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<SchemaNode>,
}

/// Channel description for the manifest. Message schemas are the
/// un-merged ones the channel declared.
#[derive(Debug, Clone)]
pub struct ChannelMeta {
  pub input: SchemaNode,
  pub incoming: Vec<(String, IncomingMeta)>,
  pub outgoing: Vec<(String, SchemaNode)>,
}

impl Serialize for ChannelMeta {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(3))?;
    map.serialize_entry("input", &self.input)?;
    map.serialize_entry("incoming", &Ordered(&self.incoming))?;
    map.serialize_entry("outgoing", &Ordered(&self.outgoing))?;
    map.end()
  }
}

impl ChannelDef {
  pub fn new<F, Fut>(name: impl Into<String>, input: SchemaNode, subscribe: F) -> Self
  where
    F: Fn(Value, ProcedureCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ChannelSource, WeftError>> + Send + 'static,
  {
    let subscribe: ChannelSubscribeFn = Arc::new(
      move |input: Value, ctx: ProcedureCtx| -> BoxFuture<Result<ChannelSource, WeftError>> {
        Box::pin(subscribe(input, ctx))
      },
    );
    Self { name: name.into(), input, incoming: Vec::new(), outgoing: Vec::new(), subscribe }
  }

  pub fn incoming(mut self, message: impl Into<String>, def: IncomingDef) -> Self {
    self.incoming.push((message.into(), def));
    self
  }

  pub fn outgoing(mut self, event: impl Into<String>, payload: SchemaNode) -> Self {
    self.outgoing.push((event.into(), payload));
    self
  }

  /// Lower the channel to plain procedures: one `{channel}.{message}`
  /// command per incoming message and a `{channel}.events` subscription.
  pub fn expand(self) -> (Vec<ProcedureDef>, ChannelMeta) {
    let mut procedures = Vec::with_capacity(self.incoming.len() + 1);
    let mut incoming_meta = Vec::with_capacity(self.incoming.len());

    for (msg_name, msg) in self.incoming {
      procedures.push(ProcedureDef {
        name: format!("{}.{msg_name}", self.name),
        kind: ProcedureKind::Command,
        input: merge_object_schemas(&self.input, &msg.input),
        output: msg.output.clone(),
        error: msg.error.clone(),
        handler: Handler::Call(msg.handler),
      });
      incoming_meta
        .push((msg_name, IncomingMeta { input: msg.input, output: msg.output, error: msg.error }));
    }

    let union = SchemaNode::discriminated_union(
      EVENT_TAG,
      self
        .outgoing
        .iter()
        .map(|(event, payload)| (event.clone(), SchemaNode::object([("payload", payload.clone())]))),
    );

    let table: Arc<HashMap<String, SchemaNode>> = Arc::new(self.outgoing.iter().cloned().collect());
    let subscribe = self.subscribe;
    let handler: SubscriptionHandlerFn = Arc::new(
      move |input: Value, ctx: ProcedureCtx| -> BoxFuture<Result<PushSource, WeftError>> {
        let subscribe = subscribe.clone();
        let table = table.clone();
        Box::pin(async move {
          let source = subscribe(input, ctx).await?;
          Ok(PushSource::new(move |sink| (source.0)(ChannelEmitter { table, sink })))
        })
      },
    );

    procedures.push(ProcedureDef {
      name: format!("{}.events", self.name),
      kind: ProcedureKind::Subscription,
      input: self.input.clone(),
      output: union,
      error: None,
      handler: Handler::Subscribe(handler),
    });

    let meta = ChannelMeta { input: self.input, incoming: incoming_meta, outgoing: self.outgoing };
    (procedures, meta)
  }
}

/// Channel fields first, then message fields; a message field replaces a
/// channel field of the same name in place.
fn merge_object_schemas(channel: &SchemaNode, message: &SchemaNode) -> SchemaNode {
  let mut fields: Vec<Field> = channel.fields().map(<[Field]>::to_vec).unwrap_or_default();
  for field in message.fields().unwrap_or_default() {
    match fields.iter_mut().find(|f| f.name == field.name) {
      Some(existing) => existing.schema = field.schema.clone(),
      None => fields.push(field.clone()),
    }
  }
  SchemaNode::Object(fields)
}
