/* src/server/core/rust/src/build_loader/loader.rs */

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::types::{LayoutEntry, LoaderConfig, RouteManifest, RpcHashMap, pick_template};
use crate::i18n::I18nConfig;
use crate::page::{LayoutDef, LoaderDef, PageDef, ParamSource, ParamType};
use crate::template::{LayoutShell, OUTLET_MARKER};

pub const ROUTE_MANIFEST: &str = "route-manifest.json";
pub const RPC_HASH_MAP: &str = "rpc-hash-map.json";
pub const LOCALES_DIR: &str = "locales";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
  #[error("failed to read {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid JSON in {}: {source}", .path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("route {route}: no template")]
  MissingTemplate { route: String },
  #[error("route {route}: unknown layout {layout}")]
  UnknownLayout { route: String, layout: String },
  #[error("layout {0} is its own ancestor")]
  LayoutCycle(String),
  #[error("loader {loader}: param {param} has unknown source {from}")]
  InvalidParamSource { loader: String, param: String, from: String },
}

fn read_text(path: &Path) -> Result<String, LoadError> {
  std::fs::read_to_string(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
  let text = read_text(path)?;
  serde_json::from_str(&text).map_err(|source| LoadError::Json { path: path.to_path_buf(), source })
}

fn read_manifest(dir: &Path) -> Result<RouteManifest, LoadError> {
  read_json(&dir.join(ROUTE_MANIFEST))
}

fn parse_loaders(loaders: &BTreeMap<String, LoaderConfig>) -> Result<Vec<LoaderDef>, LoadError> {
  loaders
    .iter()
    .map(|(key, config)| {
      let mut def = LoaderDef::new(key, &config.procedure);
      for (param, pc) in &config.params {
        let from = match pc.from.as_str() {
          "route" => ParamSource::Route,
          "query" => ParamSource::Query,
          other => {
            return Err(LoadError::InvalidParamSource {
              loader: key.clone(),
              param: param.clone(),
              from: other.to_string(),
            });
          }
        };
        def = def.param(param, from, ParamType::parse(&pc.param_type));
      }
      Ok(def)
    })
    .collect()
}

/// Shell markup of one layout. Variants without an outlet are dropped.
fn load_shell(
  dir: &Path,
  id: &str,
  entry: &LayoutEntry,
  default_locale: Option<&str>,
) -> Result<Option<LayoutShell>, LoadError> {
  let Some(path) = pick_template(&entry.template, &entry.templates, default_locale) else {
    return Ok(None);
  };
  let default = read_text(&dir.join(path))?;
  if !default.contains(OUTLET_MARKER) {
    tracing::warn!(layout = id, "layout template has no outlet");
    return Ok(None);
  }
  let mut shell = LayoutShell::new(default);
  for (locale, path) in entry.templates.iter().flatten() {
    let markup = read_text(&dir.join(path))?;
    if markup.contains(OUTLET_MARKER) {
      shell = shell.with_locale(locale.clone(), markup);
    } else {
      tracing::warn!(layout = id, locale = %locale, "layout template has no outlet");
    }
  }
  Ok(Some(shell))
}

/// Ancestors of `layout_id`, outer to inner.
fn build_layout_chain(
  dir: &Path,
  route: &str,
  layout_id: &str,
  layouts: &HashMap<String, LayoutEntry>,
  default_locale: Option<&str>,
) -> Result<(Vec<LayoutDef>, Vec<String>), LoadError> {
  let mut chain = Vec::new();
  let mut keys = Vec::new();
  let mut current = Some(layout_id.to_string());
  while let Some(id) = current {
    if chain.iter().any(|l: &LayoutDef| l.id == id) {
      return Err(LoadError::LayoutCycle(id));
    }
    let entry = layouts
      .get(&id)
      .ok_or_else(|| LoadError::UnknownLayout { route: route.to_string(), layout: id.clone() })?;
    keys.extend(entry.i18n_keys.iter().cloned());
    let mut layout = LayoutDef::new(id.clone());
    layout.loaders = parse_loaders(&entry.loaders)?;
    layout.shell = load_shell(dir, &id, entry, default_locale)?;
    chain.push(layout);
    current = entry.parent.clone();
  }
  chain.reverse();
  Ok((chain, keys))
}

/// Literal segments sort before parameters so specific routes register first.
fn route_order(a: &str, b: &str) -> Ordering {
  let seg_a: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
  let seg_b: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();
  for (x, y) in seg_a.iter().zip(&seg_b) {
    let ord = match (x.starts_with(':'), y.starts_with(':')) {
      (false, true) => Ordering::Less,
      (true, false) => Ordering::Greater,
      _ => x.cmp(y),
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }
  seg_a.len().cmp(&seg_b.len())
}

/// Load every page from a build directory, in a deterministic order.
pub fn load_build_output(dir: impl AsRef<Path>) -> Result<Vec<PageDef>, LoadError> {
  let dir = dir.as_ref();
  let manifest = read_manifest(dir)?;
  let default_locale = manifest.i18n.as_ref().map(|i| i.default.as_str());

  let mut routes: Vec<_> = manifest.routes.iter().collect();
  routes.sort_by(|a, b| route_order(a.0, b.0));

  let mut pages = Vec::with_capacity(routes.len());
  for (route, entry) in routes {
    let path = pick_template(&entry.template, &entry.templates, default_locale)
      .ok_or_else(|| LoadError::MissingTemplate { route: route.clone() })?;
    let mut page = PageDef::new(route, read_text(&dir.join(path))?);
    for (locale, path) in entry.templates.iter().flatten() {
      page.locale_templates.insert(locale.clone(), read_text(&dir.join(path))?);
    }
    let mut keys = Vec::new();
    if let Some(layout) = &entry.layout {
      let (chain, layout_keys) =
        build_layout_chain(dir, route, layout, &manifest.layouts, default_locale)?;
      page.layout_chain = chain;
      keys = layout_keys;
    }
    for key in &entry.i18n_keys {
      if !keys.contains(key) {
        keys.push(key.clone());
      }
    }
    page.i18n_keys = keys;
    page.loaders = parse_loaders(&entry.loaders)?;
    page.data_id = manifest.data_id.clone();
    page.head_meta = entry.head_meta.clone();
    pages.push(page);
  }
  Ok(pages)
}

/// `Ok(None)` when the build did not obfuscate procedure names.
pub fn load_rpc_hash_map(dir: impl AsRef<Path>) -> Result<Option<RpcHashMap>, LoadError> {
  let path = dir.as_ref().join(RPC_HASH_MAP);
  if !path.exists() {
    return Ok(None);
  }
  read_json(&path).map(Some)
}

/// `Ok(None)` when the build has no i18n section. Missing locale files load
/// as empty message tables.
pub fn load_i18n_config(dir: impl AsRef<Path>) -> Result<Option<I18nConfig>, LoadError> {
  let dir = dir.as_ref();
  let Some(i18n) = read_manifest(dir)?.i18n else {
    return Ok(None);
  };
  let default = if i18n.default.is_empty() {
    i18n.locales.first().cloned().unwrap_or_default()
  } else {
    i18n.default
  };
  let mut config = I18nConfig::new(i18n.locales, default);
  for locale in config.locales.clone() {
    let path = dir.join(LOCALES_DIR).join(format!("{locale}.json"));
    let messages: Map<String, Value> = if path.exists() {
      read_json(&path)?
    } else {
      tracing::warn!(locale = %locale, "no message file for locale");
      Map::new()
    };
    config = config.with_messages(locale, messages);
  }
  Ok(Some(config))
}
