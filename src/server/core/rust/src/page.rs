/* src/server/core/rust/src/page.rs */

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;

use futures_util::future::join_all;
use serde_json::{Map, Value};

use crate::errors::WeftError;
use crate::template::LayoutShell;

/// Where a loader parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
  Route,
  Query,
}

/// Coercion applied to the raw string before it reaches the procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  String,
  Int,
  Number,
  Boolean,
}

impl ParamType {
  pub fn parse(raw: &str) -> Self {
    match raw {
      "int" | "integer" | "int32" | "uint32" => Self::Int,
      "number" | "float" | "float64" => Self::Number,
      "bool" | "boolean" => Self::Boolean,
      _ => Self::String,
    }
  }

  /// Values that fail to parse are passed through as strings.
  fn coerce(self, raw: &str) -> Value {
    let parsed = match self {
      Self::String => None,
      Self::Int => raw.parse::<i64>().ok().map(Value::from),
      Self::Number => {
        raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
      }
      Self::Boolean => raw.parse::<bool>().ok().map(Value::Bool),
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_string()))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
  /// Input field name, also the route parameter or query key it reads.
  pub name: String,
  pub from: ParamSource,
  pub ty: ParamType,
}

/// Runs one procedure and stores its result under `data_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderDef {
  pub data_key: String,
  pub procedure: String,
  pub params: Vec<ParamBinding>,
}

impl LoaderDef {
  pub fn new(data_key: impl Into<String>, procedure: impl Into<String>) -> Self {
    Self { data_key: data_key.into(), procedure: procedure.into(), params: Vec::new() }
  }

  pub fn param(mut self, name: impl Into<String>, from: ParamSource, ty: ParamType) -> Self {
    self.params.push(ParamBinding { name: name.into(), from, ty });
    self
  }

  /// Procedure input assembled from the bindings. Missing sources are omitted.
  pub fn input(
    &self,
    route_params: &BTreeMap<String, String>,
    query: &BTreeMap<String, String>,
  ) -> Value {
    let mut input = Map::new();
    for binding in &self.params {
      let source = match binding.from {
        ParamSource::Route => route_params,
        ParamSource::Query => query,
      };
      if let Some(raw) = source.get(&binding.name) {
        input.insert(binding.name.clone(), binding.ty.coerce(raw));
      }
    }
    Value::Object(input)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutDef {
  pub id: String,
  pub loaders: Vec<LoaderDef>,
  /// Markup wrapped around inner layouts and the page. Rendered against this
  /// layout's loader results only.
  pub shell: Option<LayoutShell>,
}

impl LayoutDef {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into(), loaders: Vec::new(), shell: None }
  }

  pub fn loader(mut self, loader: LoaderDef) -> Self {
    self.loaders.push(loader);
    self
  }

  pub fn shell(mut self, shell: LayoutShell) -> Self {
    self.shell = Some(shell);
    self
  }
}

/// A pre-rendered page. The template holds the page's own markup; layout
/// markup lives on the layouts in `layout_chain`.
#[derive(Debug, Clone, Default)]
pub struct PageDef {
  pub route: String,
  pub template: String,
  /// Per-locale template variants.
  pub locale_templates: HashMap<String, String>,
  pub loaders: Vec<LoaderDef>,
  /// Ancestor layouts, outer to inner.
  pub layout_chain: Vec<LayoutDef>,
  /// Overrides the router-wide data script id.
  pub data_id: Option<String>,
  /// Message keys sent with the page; empty means all.
  pub i18n_keys: Vec<String>,
  /// Markup placed right after `<meta charset="utf-8">`.
  pub head_meta: Option<String>,
}

impl PageDef {
  pub fn new(route: impl Into<String>, template: impl Into<String>) -> Self {
    Self { route: route.into(), template: template.into(), ..Self::default() }
  }

  pub fn loader(mut self, loader: LoaderDef) -> Self {
    self.loaders.push(loader);
    self
  }

  pub fn layout(mut self, layout: LayoutDef) -> Self {
    self.layout_chain.push(layout);
    self
  }

  pub fn locale_template(mut self, locale: impl Into<String>, template: impl Into<String>) -> Self {
    self.locale_templates.insert(locale.into(), template.into());
    self
  }

  pub fn head_meta(mut self, meta: impl Into<String>) -> Self {
    self.head_meta = Some(meta.into());
    self
  }

  pub fn i18n_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
    self.i18n_keys = keys.into_iter().map(Into::into).collect();
    self
  }

  /// Every loader, layouts first (outer to inner), tagged with its owning layout.
  fn all_loaders(&self) -> impl Iterator<Item = (Option<&str>, &LoaderDef)> {
    self
      .layout_chain
      .iter()
      .flat_map(|layout| layout.loaders.iter().map(move |l| (Some(layout.id.as_str()), l)))
      .chain(self.loaders.iter().map(|l| (None, l)))
  }

  pub fn procedures(&self) -> impl Iterator<Item = &str> {
    self.all_loaders().map(|(_, l)| l.procedure.as_str())
  }
}

/// Settled loader output for one request.
#[derive(Debug, Default, PartialEq)]
pub struct LoaderResults {
  /// Page-level results by data key.
  pub page: Map<String, Value>,
  /// Layout results by layout id, outer to inner.
  pub layouts: Vec<(String, Map<String, Value>)>,
}

/// Run every loader of the page and its layouts concurrently. All calls
/// settle before the first failure (in declaration order) is returned.
pub async fn run_loaders<F, Fut>(
  page: &PageDef,
  route_params: &BTreeMap<String, String>,
  query: &BTreeMap<String, String>,
  call: F,
) -> Result<LoaderResults, WeftError>
where
  F: Fn(String, Value) -> Fut,
  Fut: Future<Output = Result<Value, WeftError>>,
{
  let loaders: Vec<(Option<&str>, &LoaderDef)> = page.all_loaders().collect();
  let calls = loaders
    .iter()
    .map(|(_, loader)| call(loader.procedure.clone(), loader.input(route_params, query)));
  let settled = join_all(calls).await;

  let mut results = LoaderResults::default();
  for layout in &page.layout_chain {
    results.layouts.push((layout.id.clone(), Map::new()));
  }
  for ((owner, loader), outcome) in loaders.into_iter().zip(settled) {
    let value = outcome.map_err(|err| {
      tracing::warn!(
        route = %page.route,
        loader = %loader.data_key,
        procedure = %loader.procedure,
        code = err.code(),
        "page loader failed"
      );
      err
    })?;
    match owner {
      Some(id) => {
        if let Some((_, data)) = results.layouts.iter_mut().find(|(lid, _)| lid.as_str() == id) {
          data.insert(loader.data_key.clone(), value);
        }
      }
      None => {
        results.page.insert(loader.data_key.clone(), value);
      }
    }
  }
  Ok(results)
}

pub const LAYOUTS_KEY: &str = "_layouts";
pub const I18N_KEY: &str = "_i18n";

/// The embedded payload: page data at the top level, layout data under
/// `_layouts` keyed by layout id. Layouts without data are left out.
pub fn build_page_data(results: &LoaderResults) -> Map<String, Value> {
  let mut payload = results.page.clone();
  let layouts: Map<String, Value> = results
    .layouts
    .iter()
    .filter(|(_, data)| !data.is_empty())
    .map(|(id, data)| (id.clone(), Value::Object(data.clone())))
    .collect();
  if !layouts.is_empty() {
    payload.insert(LAYOUTS_KEY.to_string(), Value::Object(layouts));
  }
  payload
}

/// Data used to resolve the tokens of one scope: every loader result keyed
/// by data key, plus the fields of object results spread to the top level
/// where they do not collide with a data key.
pub fn flatten_for_slots(scope: &Map<String, Value>) -> Value {
  let mut flat = scope.clone();
  let keys: HashSet<&String> = scope.keys().collect();
  for value in scope.values() {
    if let Value::Object(nested) = value {
      for (k, v) in nested {
        if !keys.contains(k) && !flat.contains_key(k) {
          flat.insert(k.clone(), v.clone());
        }
      }
    }
  }
  Value::Object(flat)
}
