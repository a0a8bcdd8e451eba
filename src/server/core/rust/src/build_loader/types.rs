/* src/server/core/rust/src/build_loader/types.rs */

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

#[derive(Deserialize)]
pub(super) struct RouteManifest {
  #[serde(default)]
  pub(super) layouts: HashMap<String, LayoutEntry>,
  pub(super) routes: HashMap<String, RouteEntry>,
  #[serde(default)]
  pub(super) data_id: Option<String>,
  #[serde(default)]
  pub(super) i18n: Option<I18nManifest>,
}

#[derive(Deserialize)]
pub(super) struct I18nManifest {
  #[serde(default)]
  pub(super) locales: Vec<String>,
  #[serde(default)]
  pub(super) default: String,
}

#[derive(Deserialize)]
pub(super) struct LayoutEntry {
  #[serde(default)]
  pub(super) template: Option<String>,
  #[serde(default)]
  pub(super) templates: Option<HashMap<String, String>>,
  #[serde(default)]
  pub(super) loaders: BTreeMap<String, LoaderConfig>,
  #[serde(default)]
  pub(super) parent: Option<String>,
  #[serde(default)]
  pub(super) i18n_keys: Vec<String>,
}

#[derive(Deserialize)]
pub(super) struct RouteEntry {
  pub(super) template: Option<String>,
  #[serde(default)]
  pub(super) templates: Option<HashMap<String, String>>,
  #[serde(default)]
  pub(super) layout: Option<String>,
  #[serde(default)]
  pub(super) loaders: BTreeMap<String, LoaderConfig>,
  #[serde(default)]
  pub(super) head_meta: Option<String>,
  #[serde(default)]
  pub(super) i18n_keys: Vec<String>,
}

/// Singular `template` wins; otherwise the default locale's entry, then the
/// alphabetically first one.
pub(super) fn pick_template(
  single: &Option<String>,
  multi: &Option<HashMap<String, String>>,
  default_locale: Option<&str>,
) -> Option<String> {
  if let Some(t) = single {
    return Some(t.clone());
  }
  let map = multi.as_ref()?;
  if let Some(loc) = default_locale
    && let Some(t) = map.get(loc)
  {
    return Some(t.clone());
  }
  map.iter().min_by(|a, b| a.0.cmp(b.0)).map(|(_, t)| t.clone())
}

#[derive(Deserialize)]
pub(super) struct LoaderConfig {
  pub(super) procedure: String,
  #[serde(default)]
  pub(super) params: BTreeMap<String, ParamConfig>,
}

#[derive(Deserialize)]
pub(super) struct ParamConfig {
  pub(super) from: String,
  #[serde(rename = "type", default = "default_type")]
  pub(super) param_type: String,
}

pub(super) fn default_type() -> String {
  "string".to_string()
}

/// Obfuscated wire names from build output: logical name to hash.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RpcHashMap {
  pub salt: String,
  pub batch: String,
  pub procedures: HashMap<String, String>,
}

impl RpcHashMap {
  /// hash -> logical name
  pub fn reverse_lookup(&self) -> HashMap<String, String> {
    self.procedures.iter().map(|(name, hash)| (hash.clone(), name.clone())).collect()
  }
}
