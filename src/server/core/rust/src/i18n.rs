/* src/server/core/rust/src/i18n.rs */

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::resolve::{LocaleResolver, ResolveStrategy};

/// Runtime i18n configuration loaded from build output.
#[derive(Debug, Clone, Default)]
pub struct I18nConfig {
  pub locales: Vec<String>,
  pub default: String,
  /// Flat message tables by locale.
  pub messages: HashMap<String, Map<String, Value>>,
}

impl I18nConfig {
  pub fn new(locales: Vec<String>, default: impl Into<String>) -> Self {
    Self { locales, default: default.into(), messages: HashMap::new() }
  }

  pub fn with_messages(mut self, locale: impl Into<String>, messages: Map<String, Value>) -> Self {
    self.messages.insert(locale.into(), messages);
    self
  }

  pub fn resolver(&self, strategies: Vec<Box<dyn ResolveStrategy>>) -> LocaleResolver {
    LocaleResolver::new(self.locales.clone(), self.default.clone(), strategies)
  }

  /// Messages for `locale`, falling back to the default locale per key.
  /// An empty `keys` list selects every key.
  pub fn messages_for(&self, locale: &str, keys: &[String]) -> Map<String, Value> {
    let empty = Map::new();
    let primary = self.messages.get(locale).unwrap_or(&empty);
    let fallback = self.messages.get(&self.default).unwrap_or(&empty);
    let lookup = |key: &str| primary.get(key).or_else(|| fallback.get(key)).cloned();

    if keys.is_empty() {
      let mut out = fallback.clone();
      out.extend(primary.iter().map(|(k, v)| (k.clone(), v.clone())));
      return out;
    }
    keys.iter().filter_map(|k| lookup(k).map(|v| (k.clone(), v))).collect()
  }

  /// The `_i18n` entry of a page payload.
  pub fn page_payload(&self, locale: &str, keys: &[String]) -> Value {
    serde_json::json!({
      "locale": locale,
      "messages": Value::Object(self.messages_for(locale, keys)),
    })
  }
}
