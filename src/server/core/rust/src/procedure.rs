/* src/server/core/rust/src/procedure.rs */

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use serde_json::Value;

use crate::errors::WeftError;
use crate::schema::SchemaNode;
use crate::subscription::PushSource;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

pub type HandlerFn =
  Arc<dyn Fn(Value, ProcedureCtx) -> BoxFuture<Result<Value, WeftError>> + Send + Sync>;

pub type SubscriptionHandlerFn =
  Arc<dyn Fn(Value, ProcedureCtx) -> BoxFuture<Result<PushSource, WeftError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
  Query,
  Command,
  Subscription,
}

impl ProcedureKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Query => "query",
      Self::Command => "command",
      Self::Subscription => "subscription",
    }
  }
}

/// Request context handed to every handler.
#[derive(Debug, Clone, Default)]
pub struct ProcedureCtx {
  /// Locale resolved for the request, when i18n is configured.
  pub locale: Option<String>,
  /// Request headers with lowercase names, as supplied by the adapter.
  pub headers: BTreeMap<String, String>,
}

impl ProcedureCtx {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
    self.locale = Some(locale.into());
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }
}

#[derive(Clone)]
pub enum Handler {
  Call(HandlerFn),
  Subscribe(SubscriptionHandlerFn),
}

/// A named, typed procedure. Immutable once handed to the router.
#[derive(Clone)]
pub struct ProcedureDef {
  pub name: String,
  pub kind: ProcedureKind,
  pub input: SchemaNode,
  pub output: SchemaNode,
  pub error: Option<SchemaNode>,
  pub handler: Handler,
}

impl ProcedureDef {
  pub fn query<F, Fut>(name: impl Into<String>, input: SchemaNode, output: SchemaNode, f: F) -> Self
  where
    F: Fn(Value, ProcedureCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WeftError>> + Send + 'static,
  {
    Self::call(name.into(), ProcedureKind::Query, input, output, f)
  }

  pub fn command<F, Fut>(
    name: impl Into<String>,
    input: SchemaNode,
    output: SchemaNode,
    f: F,
  ) -> Self
  where
    F: Fn(Value, ProcedureCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WeftError>> + Send + 'static,
  {
    Self::call(name.into(), ProcedureKind::Command, input, output, f)
  }

  pub fn subscription<F, Fut>(
    name: impl Into<String>,
    input: SchemaNode,
    output: SchemaNode,
    f: F,
  ) -> Self
  where
    F: Fn(Value, ProcedureCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PushSource, WeftError>> + Send + 'static,
  {
    let handler: SubscriptionHandlerFn = Arc::new(
      move |input: Value, ctx: ProcedureCtx| -> BoxFuture<Result<PushSource, WeftError>> {
        Box::pin(f(input, ctx))
      },
    );
    Self {
      name: name.into(),
      kind: ProcedureKind::Subscription,
      input,
      output,
      error: None,
      handler: Handler::Subscribe(handler),
    }
  }

  fn call<F, Fut>(
    name: String,
    kind: ProcedureKind,
    input: SchemaNode,
    output: SchemaNode,
    f: F,
  ) -> Self
  where
    F: Fn(Value, ProcedureCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WeftError>> + Send + 'static,
  {
    let handler: HandlerFn =
      Arc::new(move |input: Value, ctx: ProcedureCtx| -> BoxFuture<Result<Value, WeftError>> {
        Box::pin(f(input, ctx))
      });
    Self { name, kind, input, output, error: None, handler: Handler::Call(handler) }
  }

  /// Declare the schema of the error payload this procedure may return.
  pub fn with_error(mut self, error: SchemaNode) -> Self {
    self.error = Some(error);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn query_constructor_wraps_handler() {
    let def = ProcedureDef::query("echo", SchemaNode::any(), SchemaNode::any(), |input, _| async move {
      Ok(input)
    });
    assert_eq!(def.kind, ProcedureKind::Query);
    let Handler::Call(f) = &def.handler else { panic!("expected call handler") };
    assert_eq!(f(json!({"a": 1}), ProcedureCtx::new()).await.unwrap(), json!({"a": 1}));
  }

  #[tokio::test]
  async fn handler_sees_context() {
    let def = ProcedureDef::command("whoami", SchemaNode::any(), SchemaNode::string(), |_, ctx| {
      let locale = ctx.locale.clone().unwrap_or_default();
      let agent = ctx.header("User-Agent").unwrap_or_default().to_string();
      async move { Ok(json!(format!("{locale}/{agent}"))) }
    });
    let Handler::Call(f) = &def.handler else { panic!("expected call handler") };
    let ctx = ProcedureCtx::new().with_locale("en").with_header("user-agent", "test");
    assert_eq!(f(Value::Null, ctx).await.unwrap(), json!("en/test"));
  }

  #[test]
  fn kind_strings() {
    assert_eq!(ProcedureKind::Query.as_str(), "query");
    assert_eq!(ProcedureKind::Command.as_str(), "command");
    assert_eq!(ProcedureKind::Subscription.as_str(), "subscription");
  }

  #[test]
  fn with_error_sets_schema() {
    let def = ProcedureDef::query("x", SchemaNode::any(), SchemaNode::any(), |_, _| async {
      Ok(Value::Null)
    })
    .with_error(SchemaNode::object([("reason", SchemaNode::string())]));
    assert!(def.error.is_some());
  }
}
