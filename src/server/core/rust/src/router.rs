/* src/server/core/rust/src/router.rs */

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::Value;

use crate::build_loader::{self, LoadError, RpcHashMap};
use crate::channel::{ChannelDef, ChannelMeta};
use crate::config::WeftConfig;
use crate::errors::WeftError;
use crate::i18n::I18nConfig;
use crate::manifest::{Manifest, build_manifest};
use crate::page::{I18N_KEY, PageDef, build_page_data, run_loaders};
use crate::procedure::{Handler, ProcedureCtx, ProcedureDef, ProcedureKind};
use crate::resolve::{LocaleResolver, ResolveStrategy};
use crate::route::{RouteError, RouteMatcher};
use crate::schema::{summarize, validate};
use crate::subscription::Subscription;
use crate::template::{
  PageTemplates, TemplateSet, TemplateStore, attach_payload, error_document, inject_head_meta,
  inject_html_lang, render_scoped,
};

/// Wire name of the batch endpoint when names are not obfuscated.
pub const BATCH_NAME: &str = "_batch";

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
  #[error("procedure {0} registered twice")]
  DuplicateProcedure(String),
  #[error(transparent)]
  Route(#[from] RouteError),
  #[error("page {route} loads {procedure}, which is not a registered query or command")]
  UnknownLoaderProcedure { route: String, procedure: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
  #[error("template reload requires dev mode")]
  NotDevMode,
  #[error(transparent)]
  Load(#[from] LoadError),
}

/// Status and JSON envelope of one RPC response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
  pub status: u16,
  pub body: Value,
}

impl RpcResponse {
  fn ok(data: Value) -> Self {
    Self { status: 200, body: serde_json::json!({ "ok": true, "data": data }) }
  }

  fn error(err: &WeftError) -> Self {
    Self { status: err.status(), body: err.to_envelope() }
  }

  pub fn is_ok(&self) -> bool {
    self.body.get("ok").and_then(Value::as_bool).unwrap_or(false)
  }
}

/// Request signals a page render needs.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
  pub path: String,
  /// Raw query string without the leading `?`.
  pub query: Option<String>,
  pub cookie: Option<String>,
  pub accept_language: Option<String>,
}

impl PageRequest {
  pub fn new(path: impl Into<String>) -> Self {
    Self { path: path.into(), ..Self::default() }
  }

  pub fn query(mut self, query: impl Into<String>) -> Self {
    self.query = Some(query.into());
    self
  }

  pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
    self.cookie = Some(cookie.into());
    self
  }

  pub fn accept_language(mut self, value: impl Into<String>) -> Self {
    self.accept_language = Some(value.into());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
  pub status: u16,
  pub html: String,
  /// Resolved locale, for `Content-Language`.
  pub locale: Option<String>,
}

#[derive(Deserialize)]
struct BatchRequest {
  calls: Vec<BatchCall>,
}

#[derive(Deserialize)]
struct BatchCall {
  #[serde(alias = "name")]
  procedure: Option<String>,
  #[serde(default)]
  input: Value,
}

pub struct RouterBuilder {
  procedures: Vec<ProcedureDef>,
  channels: Vec<ChannelDef>,
  pages: Vec<PageDef>,
  rpc_hash_map: Option<RpcHashMap>,
  i18n_config: Option<I18nConfig>,
  strategies: Vec<Box<dyn ResolveStrategy>>,
  config: WeftConfig,
}

impl RouterBuilder {
  pub fn new() -> Self {
    Self {
      procedures: Vec::new(),
      channels: Vec::new(),
      pages: Vec::new(),
      rpc_hash_map: None,
      i18n_config: None,
      strategies: Vec::new(),
      config: WeftConfig::default(),
    }
  }

  pub fn procedure(mut self, proc: ProcedureDef) -> Self {
    self.procedures.push(proc);
    self
  }

  pub fn channel(mut self, channel: ChannelDef) -> Self {
    self.channels.push(channel);
    self
  }

  pub fn page(mut self, page: PageDef) -> Self {
    self.pages.push(page);
    self
  }

  pub fn rpc_hash_map(mut self, map: RpcHashMap) -> Self {
    self.rpc_hash_map = Some(map);
    self
  }

  pub fn i18n_config(mut self, config: I18nConfig) -> Self {
    self.i18n_config = Some(config);
    self
  }

  /// Locale strategies in priority order. Empty keeps the default chain.
  pub fn resolve_strategies(mut self, strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
    self.strategies = strategies;
    self
  }

  pub fn config(mut self, config: WeftConfig) -> Self {
    self.config = config;
    self
  }

  /// Register pages, name obfuscation and i18n from a build directory.
  pub fn build_output(mut self, dir: impl AsRef<Path>) -> Result<Self, LoadError> {
    let dir = dir.as_ref();
    self.pages.extend(build_loader::load_build_output(dir)?);
    if let Some(map) = build_loader::load_rpc_hash_map(dir)? {
      self.rpc_hash_map = Some(map);
    }
    if let Some(i18n) = build_loader::load_i18n_config(dir)? {
      self.i18n_config = Some(i18n);
    }
    Ok(self)
  }

  pub fn build(self) -> Result<Router, RegistrationError> {
    let mut procedures = self.procedures;
    let mut channel_metas: Vec<(String, ChannelMeta)> = Vec::new();
    for channel in self.channels {
      let name = channel.name.clone();
      let (procs, meta) = channel.expand();
      procedures.extend(procs);
      channel_metas.push((name, meta));
    }

    let mut index = HashMap::with_capacity(procedures.len());
    for (i, proc) in procedures.iter().enumerate() {
      if index.insert(proc.name.clone(), i).is_some() {
        return Err(RegistrationError::DuplicateProcedure(proc.name.clone()));
      }
    }

    let mut pages = RouteMatcher::new();
    let mut templates = TemplateSet::new();
    for page in self.pages {
      for name in page.procedures() {
        let callable = index.get(name).is_some_and(|&i| procedures[i].kind != ProcedureKind::Subscription);
        if !callable {
          return Err(RegistrationError::UnknownLoaderProcedure {
            route: page.route.clone(),
            procedure: name.to_string(),
          });
        }
      }
      templates.insert(page.route.clone(), page_templates(&page));
      let route = page.route.clone();
      pages.add(&route, page)?;
    }

    let resolver = self.i18n_config.as_ref().map(|i18n| i18n.resolver(self.strategies));
    let wire_names = self.rpc_hash_map.as_ref().map(RpcHashMap::reverse_lookup);

    tracing::info!(
      procedures = procedures.len(),
      channels = channel_metas.len(),
      pages = pages.len(),
      obfuscated = wire_names.is_some(),
      i18n = resolver.is_some(),
      "router built"
    );

    Ok(Router {
      procedures,
      index,
      channel_metas,
      pages,
      templates: TemplateStore::new(templates),
      rpc_hash_map: self.rpc_hash_map,
      wire_names,
      i18n: self.i18n_config,
      resolver,
      config: self.config,
      open: Arc::new(AtomicUsize::new(0)),
    })
  }
}

impl Default for RouterBuilder {
  fn default() -> Self {
    Self::new()
  }
}

/// Immutable procedure and page registry. Share it behind an `Arc`.
pub struct Router {
  procedures: Vec<ProcedureDef>,
  index: HashMap<String, usize>,
  channel_metas: Vec<(String, ChannelMeta)>,
  pages: RouteMatcher<PageDef>,
  templates: TemplateStore,
  rpc_hash_map: Option<RpcHashMap>,
  /// hash -> logical name
  wire_names: Option<HashMap<String, String>>,
  i18n: Option<I18nConfig>,
  resolver: Option<LocaleResolver>,
  config: WeftConfig,
  open: Arc<AtomicUsize>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "handler panicked".to_string()
  }
}

fn page_templates(page: &PageDef) -> PageTemplates {
  PageTemplates {
    default: page.template.clone(),
    locales: page.locale_templates.clone(),
    layouts: page
      .layout_chain
      .iter()
      .filter_map(|layout| Some((layout.id.clone(), layout.shell.clone()?)))
      .collect(),
  }
}

fn parse_body(body: &[u8]) -> Result<Value, WeftError> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  serde_json::from_slice(body).map_err(malformed)
}

fn malformed(err: serde_json::Error) -> WeftError {
  WeftError::validation(format!("Malformed request body: {err}"))
}

impl Router {
  pub fn builder() -> RouterBuilder {
    RouterBuilder::new()
  }

  pub fn config(&self) -> &WeftConfig {
    &self.config
  }

  pub fn procedure(&self, name: &str) -> Option<&ProcedureDef> {
    self.index.get(name).map(|&i| &self.procedures[i])
  }

  /// Withheld (FORBIDDEN) while procedure names are obfuscated.
  pub fn manifest(&self) -> Result<Manifest, WeftError> {
    if self.rpc_hash_map.is_some() {
      return Err(WeftError::forbidden("Manifest is disabled when procedure names are obfuscated"));
    }
    Ok(build_manifest(&self.procedures, &self.channel_metas))
  }

  /// Wire name of the batch endpoint.
  pub fn batch_name(&self) -> &str {
    self.rpc_hash_map.as_ref().map_or(BATCH_NAME, |m| m.batch.as_str())
  }

  /// Logical name for a wire name. With obfuscation on, only hashes resolve.
  fn logical_name<'a>(&'a self, wire: &'a str) -> Option<&'a str> {
    match &self.wire_names {
      Some(names) => names.get(wire).map(String::as_str),
      None => Some(wire),
    }
  }

  /// Number of subscriptions currently open.
  pub fn open_subscriptions(&self) -> usize {
    self.open.load(Ordering::Acquire)
  }

  /// Dispatch one wire call. The batch endpoint name routes to [`handle_batch`](Self::handle_batch).
  pub async fn handle(&self, name: &str, body: &[u8], ctx: ProcedureCtx) -> RpcResponse {
    if name == self.batch_name() {
      return self.handle_batch(body, ctx).await;
    }
    let result = match parse_body(body) {
      Ok(input) => self.dispatch(name, input, ctx).await,
      Err(err) => Err(err),
    };
    match result {
      Ok(data) => RpcResponse::ok(data),
      Err(err) => RpcResponse::error(&err),
    }
  }

  /// Run every call concurrently. Results keep request order and fail independently.
  pub async fn handle_batch(&self, body: &[u8], ctx: ProcedureCtx) -> RpcResponse {
    let request: BatchRequest = match serde_json::from_slice(body) {
      Ok(req) => req,
      Err(err) => return RpcResponse::error(&malformed(err)),
    };
    tracing::debug!(calls = request.calls.len(), "batch");

    let calls = request.calls.into_iter().map(|call| {
      let ctx = ctx.clone();
      async move {
        let Some(name) = call.procedure else {
          return Err(WeftError::validation("Batch call is missing a procedure name"));
        };
        self.dispatch(&name, call.input, ctx).await
      }
    });
    let results: Vec<Value> = join_all(calls)
      .await
      .into_iter()
      .map(|outcome| match outcome {
        Ok(data) => serde_json::json!({ "ok": true, "data": data }),
        Err(err) => serde_json::json!({ "ok": false, "error": err.body() }),
      })
      .collect();
    RpcResponse::ok(serde_json::json!({ "results": results }))
  }

  async fn dispatch(&self, wire: &str, input: Value, ctx: ProcedureCtx) -> Result<Value, WeftError> {
    let proc = self
      .logical_name(wire)
      .and_then(|name| self.procedure(name))
      .ok_or_else(|| WeftError::not_found(format!("Procedure '{wire}' not found")))?;
    let Handler::Call(handler) = &proc.handler else {
      return Err(WeftError::validation(format!(
        "'{}' is a subscription and must be opened as a stream",
        proc.name
      )));
    };

    let errors = validate(&proc.input, &input, &self.config.input_options());
    if !errors.is_empty() {
      tracing::debug!(procedure = %proc.name, errors = errors.len(), "input rejected");
      return Err(WeftError::validation(summarize(&errors)));
    }

    tracing::debug!(procedure = %proc.name, kind = proc.kind.as_str(), "dispatch");
    let handler = handler.clone();
    self.invoke(proc, async move { handler(input, ctx).await }).await
  }

  /// Loader calls come from trusted bindings and skip input validation.
  async fn call_trusted(&self, name: String, input: Value, ctx: ProcedureCtx) -> Result<Value, WeftError> {
    let proc = self
      .procedure(&name)
      .ok_or_else(|| WeftError::internal(format!("Loader procedure '{name}' is not registered")))?;
    let Handler::Call(handler) = &proc.handler else {
      return Err(WeftError::internal(format!("Loader procedure '{name}' is a subscription")));
    };
    let handler = handler.clone();
    self.invoke(proc, async move { handler(input, ctx).await }).await
  }

  async fn invoke<F>(&self, proc: &ProcedureDef, call: F) -> Result<Value, WeftError>
  where
    F: Future<Output = Result<Value, WeftError>>,
  {
    let value = match AssertUnwindSafe(call).catch_unwind().await {
      Ok(Ok(value)) => value,
      Ok(Err(err)) => {
        tracing::warn!(procedure = %proc.name, code = err.code(), message = err.message(), "handler failed");
        return Err(err);
      }
      Err(panic) => {
        let message = panic_message(&*panic);
        tracing::error!(procedure = %proc.name, panic = %message, "handler panicked");
        return Err(WeftError::internal(message));
      }
    };

    if self.config.validate_output {
      let errors = validate(&proc.output, &value, &self.config.output_options());
      if !errors.is_empty() {
        tracing::error!(procedure = %proc.name, errors = %summarize(&errors), "output schema mismatch");
        return Err(WeftError::internal("Output validation failed"));
      }
    }
    Ok(value)
  }

  /// Open a subscription. Setup failures arrive as a single error frame.
  pub async fn subscribe(&self, name: &str, input: Value, ctx: ProcedureCtx) -> Subscription {
    match self.start_subscription(name, input, ctx).await {
      Ok(sub) => sub,
      Err(err) => {
        tracing::warn!(subscription = name, code = err.code(), "subscription rejected");
        Subscription::failed(err)
      }
    }
  }

  async fn start_subscription(
    &self,
    wire: &str,
    input: Value,
    ctx: ProcedureCtx,
  ) -> Result<Subscription, WeftError> {
    let proc = self
      .logical_name(wire)
      .and_then(|name| self.procedure(name))
      .ok_or_else(|| WeftError::not_found(format!("Subscription '{wire}' not found")))?;
    let Handler::Subscribe(handler) = &proc.handler else {
      return Err(WeftError::validation(format!("'{}' is not a subscription", proc.name)));
    };

    let errors = validate(&proc.input, &input, &self.config.input_options());
    if !errors.is_empty() {
      return Err(WeftError::validation(summarize(&errors)));
    }

    let handler = handler.clone();
    let source = match AssertUnwindSafe(async move { handler(input, ctx).await }).catch_unwind().await {
      Ok(result) => result?,
      Err(panic) => return Err(WeftError::internal(panic_message(&*panic))),
    };
    tracing::debug!(subscription = %proc.name, "subscription opened");
    Ok(Subscription::open_counted(source, self.open.clone()))
  }

  /// Render the page matching `req.path`.
  pub async fn handle_page(&self, req: &PageRequest) -> PageResponse {
    let url = match &req.query {
      Some(q) => format!("{}?{q}", req.path),
      None => req.path.clone(),
    };
    let (path, locale) = match &self.resolver {
      Some(resolver) => {
        let (_, path) = resolver.strip_locale_prefix(&req.path);
        let locale = resolver.resolve(&url, req.cookie.as_deref(), req.accept_language.as_deref());
        (path, Some(locale))
      }
      None => (req.path.as_str(), None),
    };

    let Some(matched) = self.pages.match_path(path) else {
      tracing::debug!(path, "no page");
      return PageResponse { status: 404, html: error_document(404, "Page not found"), locale };
    };
    let page = matched.value;

    let query: BTreeMap<String, String> = req
      .query
      .as_deref()
      .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
      .unwrap_or_default();
    let ctx = match &locale {
      Some(l) => ProcedureCtx::new().with_locale(l),
      None => ProcedureCtx::new(),
    };

    let loaded = run_loaders(page, &matched.params, &query, |name, input| {
      self.call_trusted(name, input, ctx.clone())
    })
    .await;
    let results = match loaded {
      Ok(results) => results,
      Err(err) => {
        let status = err.status();
        return PageResponse { status, html: error_document(status, err.message()), locale };
      }
    };

    let Some(templates) = self.templates.get(matched.pattern) else {
      tracing::error!(route = matched.pattern, "page has no template");
      return PageResponse { status: 500, html: error_document(500, ""), locale };
    };
    let mut html = render_scoped(&templates, &results, locale.as_deref());
    if let Some(meta) = &page.head_meta {
      html = inject_head_meta(&html, meta);
    }

    let mut payload = build_page_data(&results);
    if let (Some(i18n), Some(locale)) = (&self.i18n, &locale) {
      payload.insert(I18N_KEY.to_string(), i18n.page_payload(locale, &page.i18n_keys));
    }
    let data_id = page.data_id.as_deref().unwrap_or(&self.config.data_id);
    html = attach_payload(&html, &Value::Object(payload), data_id);
    if let Some(locale) = &locale {
      html = inject_html_lang(&html, locale);
    }
    PageResponse { status: 200, html, locale }
  }

  /// Re-read page and layout templates from a build directory and swap them
  /// in atomically. Only routes registered at build time are updated.
  pub fn reload_templates(&self, dir: impl AsRef<Path>) -> Result<usize, ReloadError> {
    if !self.config.dev_mode {
      return Err(ReloadError::NotDevMode);
    }
    let mut next = (*self.templates.snapshot()).clone();
    let mut updated = 0;
    for page in build_loader::load_build_output(dir)? {
      match next.get_mut(&page.route) {
        Some(slot) => {
          *slot = page_templates(&page);
          updated += 1;
        }
        None => tracing::warn!(route = %page.route, "skipping unregistered route on reload"),
      }
    }
    self.templates.replace(next);
    tracing::info!(updated, "templates reloaded");
    Ok(updated)
  }
}
