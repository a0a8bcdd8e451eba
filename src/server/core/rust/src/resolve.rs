/* src/server/core/rust/src/resolve.rs */

use std::sync::LazyLock;

use url::Url;

pub const DEFAULT_LOCALE_COOKIE: &str = "weft-locale";
pub const DEFAULT_LOCALE_PARAM: &str = "lang";

#[allow(clippy::unwrap_used)]
static BASE_URL: LazyLock<Url> = LazyLock::new(|| Url::parse("http://localhost/").unwrap());

/// Request signals available to locale strategies.
pub struct ResolveData<'a> {
  /// Request target: a path with optional query, or an absolute URL.
  pub url: &'a str,
  pub cookie_header: Option<&'a str>,
  pub accept_language: Option<&'a str>,
  pub locales: &'a [String],
  pub default_locale: &'a str,
}

impl ResolveData<'_> {
  fn parsed_url(&self) -> Option<Url> {
    BASE_URL.join(self.url).ok()
  }

  fn supported(&self, candidate: &str) -> Option<String> {
    self.locales.iter().find(|l| l.eq_ignore_ascii_case(candidate)).cloned()
  }
}

/// One step of the locale chain. Returning `None` means "no opinion".
pub trait ResolveStrategy: Send + Sync {
  fn kind(&self) -> &str;
  fn resolve(&self, data: &ResolveData) -> Option<String>;
}

struct UrlPrefix;

impl ResolveStrategy for UrlPrefix {
  fn kind(&self) -> &str {
    "url_prefix"
  }

  fn resolve(&self, data: &ResolveData) -> Option<String> {
    let url = data.parsed_url()?;
    let first = url.path_segments()?.next()?;
    data.supported(first)
  }
}

struct Cookie {
  name: String,
}

impl ResolveStrategy for Cookie {
  fn kind(&self) -> &str {
    "cookie"
  }

  fn resolve(&self, data: &ResolveData) -> Option<String> {
    let header = data.cookie_header?;
    header.split(';').find_map(|pair| {
      let (key, value) = pair.trim().split_once('=')?;
      if key.trim() == self.name { data.supported(value.trim().trim_matches('"')) } else { None }
    })
  }
}

struct AcceptLanguage;

/// `Accept-Language` entries sorted by descending quality; ties keep header order.
fn parse_accept_language(header: &str) -> Vec<(&str, f32)> {
  let mut entries: Vec<(&str, f32)> = header
    .split(',')
    .filter_map(|part| {
      let mut pieces = part.split(';');
      let tag = pieces.next()?.trim();
      if tag.is_empty() {
        return None;
      }
      let q = pieces
        .find_map(|p| p.trim().strip_prefix("q="))
        .map_or(Some(1.0), |q| q.trim().parse::<f32>().ok())?;
      (q > 0.0).then_some((tag, q))
    })
    .collect();
  entries.sort_by(|a, b| b.1.total_cmp(&a.1));
  entries
}

impl ResolveStrategy for AcceptLanguage {
  fn kind(&self) -> &str {
    "accept_language"
  }

  fn resolve(&self, data: &ResolveData) -> Option<String> {
    let header = data.accept_language?;
    parse_accept_language(header).into_iter().find_map(|(tag, _)| {
      if tag == "*" {
        return None;
      }
      data.supported(tag).or_else(|| {
        let primary = tag.split('-').next()?;
        data.supported(primary)
      })
    })
  }
}

struct UrlQuery {
  param: String,
}

impl ResolveStrategy for UrlQuery {
  fn kind(&self) -> &str {
    "url_query"
  }

  fn resolve(&self, data: &ResolveData) -> Option<String> {
    let url = data.parsed_url()?;
    url.query_pairs().find(|(k, _)| k == self.param.as_str()).and_then(|(_, v)| data.supported(&v))
  }
}

pub fn from_url_prefix() -> Box<dyn ResolveStrategy> {
  Box::new(UrlPrefix)
}

pub fn from_cookie(name: impl Into<String>) -> Box<dyn ResolveStrategy> {
  Box::new(Cookie { name: name.into() })
}

pub fn from_accept_language() -> Box<dyn ResolveStrategy> {
  Box::new(AcceptLanguage)
}

pub fn from_url_query(param: impl Into<String>) -> Box<dyn ResolveStrategy> {
  Box::new(UrlQuery { param: param.into() })
}

/// URL prefix, `weft-locale` cookie, `Accept-Language`, `lang` query parameter.
pub fn default_strategies() -> Vec<Box<dyn ResolveStrategy>> {
  vec![
    from_url_prefix(),
    from_cookie(DEFAULT_LOCALE_COOKIE),
    from_accept_language(),
    from_url_query(DEFAULT_LOCALE_PARAM),
  ]
}

/// Run strategies in order; the first supported locale wins, else the default.
pub fn resolve_chain(strategies: &[Box<dyn ResolveStrategy>], data: &ResolveData) -> String {
  strategies
    .iter()
    .filter_map(|s| s.resolve(data))
    .find(|loc| data.locales.contains(loc))
    .unwrap_or_else(|| data.default_locale.to_string())
}

/// A configured chain plus the locale set it resolves against.
pub struct LocaleResolver {
  strategies: Vec<Box<dyn ResolveStrategy>>,
  locales: Vec<String>,
  default_locale: String,
}

impl LocaleResolver {
  /// Empty `strategies` falls back to [`default_strategies`].
  pub fn new(
    locales: Vec<String>,
    default_locale: impl Into<String>,
    strategies: Vec<Box<dyn ResolveStrategy>>,
  ) -> Self {
    let strategies = if strategies.is_empty() { default_strategies() } else { strategies };
    Self { strategies, locales, default_locale: default_locale.into() }
  }

  pub fn locales(&self) -> &[String] {
    &self.locales
  }

  pub fn default_locale(&self) -> &str {
    &self.default_locale
  }

  pub fn has_url_prefix(&self) -> bool {
    self.strategies.iter().any(|s| s.kind() == "url_prefix")
  }

  pub fn resolve(
    &self,
    url: &str,
    cookie_header: Option<&str>,
    accept_language: Option<&str>,
  ) -> String {
    let data = ResolveData {
      url,
      cookie_header,
      accept_language,
      locales: &self.locales,
      default_locale: &self.default_locale,
    };
    resolve_chain(&self.strategies, &data)
  }

  /// Split a leading supported locale segment off `path` when URL prefixes are active.
  /// `/zh/about` gives `(Some("zh"), "/about")`; `/zh` gives `(Some("zh"), "/")`.
  pub fn strip_locale_prefix<'p>(&self, path: &'p str) -> (Option<String>, &'p str) {
    if !self.has_url_prefix() {
      return (None, path);
    }
    let trimmed = path.trim_start_matches('/');
    let (first, rest) = trimmed.split_once('/').map_or((trimmed, ""), |(f, r)| (f, r));
    match self.locales.iter().find(|l| l.as_str() == first) {
      Some(locale) => {
        let rest_start = path.len() - rest.len();
        let remainder = if rest.is_empty() { "/" } else { &path[rest_start - 1..] };
        (Some(locale.clone()), remainder)
      }
      None => (None, path),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn locales() -> Vec<String> {
    vec!["en".to_string(), "zh".to_string(), "pt-BR".to_string()]
  }

  fn data<'a>(
    url: &'a str,
    cookie: Option<&'a str>,
    accept: Option<&'a str>,
    locales: &'a [String],
  ) -> ResolveData<'a> {
    ResolveData { url, cookie_header: cookie, accept_language: accept, locales, default_locale: "en" }
  }

  #[test]
  fn accept_language_primary_subtag_fallback() {
    let locs = locales();
    let d = data("/", None, Some("zh-CN,en;q=0.8"), &locs);
    assert_eq!(resolve_chain(&[from_accept_language()], &d), "zh");
  }

  #[test]
  fn accept_language_respects_quality() {
    let locs = locales();
    let d = data("/", None, Some("fr;q=0.9, en;q=0.5, zh;q=0.7"), &locs);
    assert_eq!(resolve_chain(&[from_accept_language()], &d), "zh");
  }

  #[test]
  fn accept_language_exact_region_match() {
    let locs = locales();
    let d = data("/", None, Some("pt-br"), &locs);
    assert_eq!(resolve_chain(&[from_accept_language()], &d), "pt-BR");
  }

  #[test]
  fn accept_language_ignores_zero_quality_and_wildcard() {
    let locs = locales();
    let d = data("/", None, Some("zh;q=0, *"), &locs);
    assert_eq!(resolve_chain(&[from_accept_language()], &d), "en");
  }

  #[test]
  fn quality_sort_is_stable() {
    let parsed = parse_accept_language("a;q=0.5, b, c;q=0.5, d");
    let tags: Vec<&str> = parsed.iter().map(|(t, _)| *t).collect();
    assert_eq!(tags, vec!["b", "d", "a", "c"]);
  }

  #[test]
  fn url_prefix_strategy() {
    let locs = locales();
    assert_eq!(resolve_chain(&[from_url_prefix()], &data("/zh/about", None, None, &locs)), "zh");
    assert_eq!(resolve_chain(&[from_url_prefix()], &data("/about", None, None, &locs)), "en");
    assert_eq!(
      resolve_chain(&[from_url_prefix()], &data("https://x.test/zh?a=1", None, None, &locs)),
      "zh"
    );
  }

  #[test]
  fn cookie_strategy() {
    let locs = locales();
    let d = data("/", Some("theme=dark; weft-locale=zh; other=1"), None, &locs);
    assert_eq!(resolve_chain(&[from_cookie(DEFAULT_LOCALE_COOKIE)], &d), "zh");
    let d = data("/", Some("weft-locale=fr"), None, &locs);
    assert_eq!(resolve_chain(&[from_cookie(DEFAULT_LOCALE_COOKIE)], &d), "en");
  }

  #[test]
  fn query_strategy() {
    let locs = locales();
    let d = data("/about?x=1&lang=zh", None, None, &locs);
    assert_eq!(resolve_chain(&[from_url_query("lang")], &d), "zh");
  }

  #[test]
  fn chain_order_first_supported_wins() {
    let locs = locales();
    let d = data("/about?lang=zh", Some("weft-locale=fr"), Some("pt-BR"), &locs);
    // cookie names an unsupported locale, so Accept-Language decides before the query
    assert_eq!(resolve_chain(&default_strategies(), &d), "pt-BR");
  }

  #[test]
  fn chain_falls_back_to_default() {
    let locs = locales();
    assert_eq!(resolve_chain(&default_strategies(), &data("/", None, None, &locs)), "en");
    assert_eq!(resolve_chain(&[], &data("/zh", None, None, &locs)), "en");
  }

  #[test]
  fn resolver_strips_locale_prefix() {
    let resolver = LocaleResolver::new(locales(), "en", Vec::new());
    assert!(resolver.has_url_prefix());
    assert_eq!(resolver.strip_locale_prefix("/zh/about"), (Some("zh".to_string()), "/about"));
    assert_eq!(resolver.strip_locale_prefix("/zh"), (Some("zh".to_string()), "/"));
    assert_eq!(resolver.strip_locale_prefix("/zh/"), (Some("zh".to_string()), "/"));
    assert_eq!(resolver.strip_locale_prefix("/about"), (None, "/about"));

    let no_prefix = LocaleResolver::new(locales(), "en", vec![from_cookie("c")]);
    assert_eq!(no_prefix.strip_locale_prefix("/zh/about"), (None, "/zh/about"));
  }

  #[test]
  fn resolver_resolves_with_signals() {
    let resolver = LocaleResolver::new(locales(), "en", Vec::new());
    assert_eq!(resolver.resolve("/", None, Some("zh-TW")), "zh");
    assert_eq!(resolver.resolve("/pt-BR/x", None, None), "pt-BR");
  }

  #[test]
  fn resolver_falls_back_to_its_default() {
    let resolver = LocaleResolver::new(locales(), "en", vec![from_cookie("c")]);
    assert_eq!(resolver.locales(), locales().as_slice());
    assert_eq!(resolver.default_locale(), "en");
    assert_eq!(resolver.resolve("/zh", Some("c=fr"), Some("zh")), resolver.default_locale());
  }
}
