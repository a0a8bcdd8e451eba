/* src/server/core/rust/src/template.rs */

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use weft_injector::{escape_html, inject_no_script};

use crate::page::{LoaderResults, flatten_for_slots};

/// Where a layout shell receives the markup it wraps.
pub const OUTLET_MARKER: &str = "<!--weft:outlet-->";

fn pick<'a>(default: &'a str, locales: &'a HashMap<String, String>, locale: Option<&str>) -> &'a str {
  locale.and_then(|l| locales.get(l)).map_or(default, String::as_str)
}

/// Markup a layout renders around its children, split at [`OUTLET_MARKER`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutShell {
  pub default: String,
  pub locales: HashMap<String, String>,
}

impl LayoutShell {
  pub fn new(default: impl Into<String>) -> Self {
    Self { default: default.into(), locales: HashMap::new() }
  }

  pub fn with_locale(mut self, locale: impl Into<String>, markup: impl Into<String>) -> Self {
    self.locales.insert(locale.into(), markup.into());
    self
  }

  pub fn select(&self, locale: Option<&str>) -> &str {
    pick(&self.default, &self.locales, locale)
  }
}

/// Markup variants of one page plus the shells of its layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTemplates {
  pub default: String,
  pub locales: HashMap<String, String>,
  /// Shells by layout id, outer to inner. Layouts without markup are absent.
  pub layouts: Vec<(String, LayoutShell)>,
}

impl PageTemplates {
  pub fn select(&self, locale: Option<&str>) -> &str {
    pick(&self.default, &self.locales, locale)
  }

  fn shell(&self, layout: &str) -> Option<&LayoutShell> {
    self.layouts.iter().find(|(id, _)| id == layout).map(|(_, shell)| shell)
  }
}

/// Substitute tokens scope by scope: the page markup sees only page data and
/// each layout shell sees only its own loader results. Rendered markup is then
/// nested into the shells, innermost first, and never rescanned.
pub fn render_scoped(templates: &PageTemplates, results: &LoaderResults, locale: Option<&str>) -> String {
  let mut html = inject_no_script(templates.select(locale), &flatten_for_slots(&results.page));
  for (id, data) in results.layouts.iter().rev() {
    let Some(shell) = templates.shell(id) else { continue };
    let rendered = inject_no_script(shell.select(locale), &flatten_for_slots(data));
    // Escaped data cannot spell the marker, so the first hit is the shell's own.
    let Some(pos) = rendered.find(OUTLET_MARKER) else {
      tracing::warn!(layout = %id, "layout shell has no outlet");
      continue;
    };
    html = format!("{}{html}{}", &rendered[..pos], &rendered[pos + OUTLET_MARKER.len()..]);
  }
  html
}

/// Embedded payload for [`render_scoped`] output.
pub(crate) fn attach_payload(html: &str, payload: &Value, data_id: &str) -> String {
  weft_injector::insert_data_script(html, &weft_injector::data_script(data_id, payload))
}

pub type TemplateSet = HashMap<String, PageTemplates>;

/// Page templates keyed by route pattern. Readers never block; a reload
/// replaces the whole set with one pointer swap.
pub struct TemplateStore {
  current: ArcSwap<TemplateSet>,
}

impl TemplateStore {
  pub fn new(set: TemplateSet) -> Self {
    Self { current: ArcSwap::from_pointee(set) }
  }

  pub fn snapshot(&self) -> Arc<TemplateSet> {
    self.current.load_full()
  }

  pub fn get(&self, route: &str) -> Option<PageTemplates> {
    self.current.load().get(route).cloned()
  }

  pub(crate) fn replace(&self, set: TemplateSet) {
    self.current.store(Arc::new(set));
  }
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
  haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}

/// Add `lang` to the opening `<html>` tag unless it already carries one.
pub fn inject_html_lang(html: &str, locale: &str) -> String {
  let lower = html.to_ascii_lowercase();
  let mut from = 0;
  while let Some(rel) = lower[from..].find("<html") {
    let start = from + rel;
    let after = start + "<html".len();
    let boundary = lower[after..].chars().next();
    if matches!(boundary, Some(c) if c == '>' || c.is_ascii_whitespace()) {
      let tag_end = lower[after..].find('>').map_or(lower.len(), |p| after + p);
      if lower[after..tag_end].contains("lang=") {
        return html.to_string();
      }
      return format!(r#"{} lang="{}"{}"#, &html[..after], escape_html(locale), &html[after..]);
    }
    from = after;
  }
  html.to_string()
}

/// Insert `meta` after `<meta charset="utf-8">`, else right after `<head>`.
/// Documents with neither are returned unchanged.
pub fn inject_head_meta(html: &str, meta: &str) -> String {
  let anchor = find_ascii_ci(html, r#"<meta charset="utf-8">"#)
    .map(|p| p + r#"<meta charset="utf-8">"#.len())
    .or_else(|| find_ascii_ci(html, "<head>").map(|p| p + "<head>".len()));
  match anchor {
    Some(pos) => format!("{}{meta}{}", &html[..pos], &html[pos..]),
    None => html.to_string(),
  }
}

/// Minimal standalone document for failed page renders. Internal failures
/// do not expose their message.
pub fn error_document(status: u16, message: &str) -> String {
  let (title, detail) = match status {
    404 => ("Not Found", message),
    s if s >= 500 => ("Internal Server Error", "Something went wrong."),
    _ => ("Error", message),
  };
  format!(
    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{status} {title}</title></head>\
     <body><h1>{status} {title}</h1><p>{}</p></body></html>",
    escape_html(detail)
  )
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn select_locale_variant() {
    let mut t = PageTemplates { default: "en".into(), ..Default::default() };
    t.locales.insert("zh".into(), "zh".into());
    assert_eq!(t.select(Some("zh")), "zh");
    assert_eq!(t.select(Some("fr")), "en");
    assert_eq!(t.select(None), "en");
  }

  fn scope(pairs: Value) -> serde_json::Map<String, Value> {
    pairs.as_object().cloned().unwrap()
  }

  fn chained() -> PageTemplates {
    PageTemplates {
      default: "<main>%%WEFT:user.name%%</main>".into(),
      locales: HashMap::new(),
      layouts: vec![
        ("root".into(), LayoutShell::new("<body><!--weft:outlet--><i>%%WEFT:user.name%%</i></body>")),
        (
          "side".into(),
          LayoutShell::new("<aside>%%WEFT:count%%</aside><!--weft:outlet-->")
            .with_locale("zh", "<aside>%%WEFT:count%%!</aside><!--weft:outlet-->"),
        ),
      ],
    }
  }

  fn chained_results() -> LoaderResults {
    LoaderResults {
      page: scope(json!({"user": {"name": "page"}})),
      layouts: vec![
        ("root".into(), scope(json!({"user": {"name": "root"}}))),
        ("side".into(), scope(json!({"count": 2}))),
      ],
    }
  }

  #[test]
  fn scopes_render_against_their_own_data() {
    let html = render_scoped(&chained(), &chained_results(), None);
    assert_eq!(html, "<body><aside>2</aside><main>page</main><i>root</i></body>");
    let html = render_scoped(&chained(), &chained_results(), Some("zh"));
    assert_eq!(html, "<body><aside>2!</aside><main>page</main><i>root</i></body>");
  }

  #[test]
  fn page_markup_is_not_rescanned_by_shells() {
    let mut results = chained_results();
    results.page = scope(json!({"user": {"name": "%%WEFT:count%%"}}));
    let html = render_scoped(&chained(), &results, None);
    assert!(html.contains("<main>%%WEFT:count%%</main>"));
  }

  #[test]
  fn shell_without_outlet_is_skipped() {
    let templates = PageTemplates {
      default: "<p>x</p>".into(),
      layouts: vec![("root".into(), LayoutShell::new("<body></body>"))],
      ..Default::default()
    };
    let results = LoaderResults { page: Default::default(), layouts: vec![("root".into(), Default::default())] };
    assert_eq!(render_scoped(&templates, &results, None), "<p>x</p>");
  }

  #[test]
  fn store_swap_is_visible_to_new_readers() {
    let mut set = TemplateSet::new();
    set.insert("/".into(), PageTemplates { default: "v1".into(), ..Default::default() });
    let store = TemplateStore::new(set);
    let before = store.snapshot();

    let mut next = TemplateSet::new();
    next.insert("/".into(), PageTemplates { default: "v2".into(), ..Default::default() });
    store.replace(next);

    assert_eq!(before["/"].default, "v1");
    assert_eq!(store.get("/").unwrap().default, "v2");
    assert!(store.get("/missing").is_none());
  }

  #[test]
  fn html_lang_added_once() {
    assert_eq!(inject_html_lang("<html><body></body></html>", "zh"), r#"<html lang="zh"><body></body></html>"#);
    assert_eq!(
      inject_html_lang(r#"<!DOCTYPE html><HTML class="x">"#, "en"),
      r#"<!DOCTYPE html><HTML lang="en" class="x">"#
    );
    assert_eq!(inject_html_lang(r#"<html lang="fr">"#, "en"), r#"<html lang="fr">"#);
    assert_eq!(inject_html_lang("<htmlish><p></p>", "en"), "<htmlish><p></p>");
  }

  #[test]
  fn head_meta_after_charset() {
    let html = r#"<html><head><meta charset="utf-8"><link></head></html>"#;
    assert_eq!(
      inject_head_meta(html, "<title>x</title>"),
      r#"<html><head><meta charset="utf-8"><title>x</title><link></head></html>"#
    );
    assert_eq!(inject_head_meta("<head></head>", "<m>"), "<head><m></head>");
    assert_eq!(inject_head_meta("<p></p>", "<m>"), "<p></p>");
  }

  #[test]
  fn error_document_escapes_and_hides_internals() {
    let doc = error_document(404, "no <page>");
    assert!(doc.contains("404 Not Found"));
    assert!(doc.contains("no &lt;page&gt;"));
    let doc = error_document(500, "db password is hunter2");
    assert!(!doc.contains("hunter2"));
  }
}
