/* src/server/injector/rust/src/render.rs */

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::helpers::{escape_html, escape_script, stringify};

#[allow(clippy::unwrap_used)]
static TOKEN_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"%%WEFT:([A-Za-z0-9_$.\-]*)%%").unwrap());

/// Both escaped renditions of one data leaf.
pub(crate) struct Fragment {
  markup: String,
  script: String,
}

/// Pass one: every addressable leaf of the data tree, keyed by dotted path.
pub(crate) struct FragmentMap {
  entries: HashMap<String, Fragment>,
}

impl FragmentMap {
  pub(crate) fn build(data: &Value) -> Self {
    let mut entries = HashMap::new();
    collect(data, "", &mut entries);
    Self { entries }
  }

  fn lookup(&self, path: &str, in_script: bool) -> &str {
    match self.entries.get(path) {
      Some(f) if in_script => &f.script,
      Some(f) => &f.markup,
      None => "",
    }
  }
}

fn insert_leaf(value: &Value, path: &str, out: &mut HashMap<String, Fragment>) {
  let text = stringify(value);
  out.insert(
    path.to_string(),
    Fragment { markup: escape_html(&text), script: escape_script(&text) },
  );
}

fn collect(value: &Value, path: &str, out: &mut HashMap<String, Fragment>) {
  let child = |key: &str| if path.is_empty() { key.to_string() } else { format!("{path}.{key}") };
  match value {
    Value::Object(map) => {
      for (key, v) in map {
        collect(v, &child(key), out);
      }
    }
    Value::Array(items) => {
      if items.iter().all(|v| !v.is_object() && !v.is_array()) {
        insert_leaf(value, path, out);
      }
      for (idx, v) in items.iter().enumerate() {
        collect(v, &child(&idx.to_string()), out);
      }
    }
    _ => insert_leaf(value, path, out),
  }
}

/// Byte ranges of `<script>` element bodies in the template.
fn script_ranges(template: &str) -> Vec<Range<usize>> {
  let lower = template.to_ascii_lowercase();
  let mut ranges = Vec::new();
  let mut cursor = 0;
  while let Some(rel) = lower[cursor..].find("<script") {
    let open = cursor + rel;
    let Some(gt) = lower[open..].find('>') else { break };
    let body_start = open + gt + 1;
    let body_end = lower[body_start..].find("</script").map_or(lower.len(), |p| body_start + p);
    ranges.push(body_start..body_end);
    cursor = body_end;
  }
  ranges
}

/// Pass two: a single left-to-right scan of the template. Substituted text is
/// written to the output and never examined again, so values that happen to
/// look like sentinel tokens stay literal.
pub(crate) fn render(template: &str, fragments: &FragmentMap) -> String {
  let scripts = script_ranges(template);
  let mut script_idx = 0;
  let mut out = String::with_capacity(template.len());
  let mut last = 0;

  for caps in TOKEN_RE.captures_iter(template) {
    let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else { continue };
    let start = whole.start();
    while script_idx < scripts.len() && scripts[script_idx].end <= start {
      script_idx += 1;
    }
    let in_script = scripts.get(script_idx).is_some_and(|r| r.contains(&start));

    out.push_str(&template[last..start]);
    out.push_str(fragments.lookup(path.as_str(), in_script));
    last = whole.end();
  }
  out.push_str(&template[last..]);
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn render_with(template: &str, data: &Value) -> String {
    render(template, &FragmentMap::build(data))
  }

  #[test]
  fn text_token_basic() {
    assert_eq!(render_with("<p>%%WEFT:name%%</p>", &json!({"name": "Alice"})), "<p>Alice</p>");
  }

  #[test]
  fn text_token_escapes_html() {
    let html = render_with("<p>%%WEFT:msg%%</p>", &json!({"msg": "<b>\"x\"</b>"}));
    assert_eq!(html, "<p>&lt;b&gt;&quot;x&quot;&lt;/b&gt;</p>");
  }

  #[test]
  fn attribute_token_escapes_quotes() {
    let html = render_with(r#"<a href="%%WEFT:url%%">x</a>"#, &json!({"url": "/a?b=1&c=\"2\""}));
    assert_eq!(html, r#"<a href="/a?b=1&amp;c=&quot;2&quot;">x</a>"#);
  }

  #[test]
  fn nested_and_indexed_paths() {
    let data = json!({"user": {"address": {"city": "Tokyo"}}, "items": [{"n": "first"}]});
    assert_eq!(render_with("%%WEFT:user.address.city%%", &data), "Tokyo");
    assert_eq!(render_with("%%WEFT:items.0.n%%", &data), "first");
  }

  #[test]
  fn missing_path_renders_empty() {
    assert_eq!(render_with("<p>%%WEFT:missing.deep%%</p>", &json!({})), "<p></p>");
  }

  #[test]
  fn object_path_renders_empty() {
    assert_eq!(render_with("<p>%%WEFT:user%%</p>", &json!({"user": {"a": 1}})), "<p></p>");
  }

  #[test]
  fn substituted_output_is_not_rescanned() {
    let data = json!({"a": "%%WEFT:b%%", "b": "secret"});
    assert_eq!(render_with("<p>%%WEFT:a%%</p>", &data), "<p>%%WEFT:b%%</p>");
  }

  #[test]
  fn amp_is_escaped_once() {
    assert_eq!(render_with("%%WEFT:v%%", &json!({"v": "&amp;"})), "&amp;amp;");
  }

  #[test]
  fn script_context_uses_script_escaping() {
    let data = json!({"t": "</script><img>"});
    let html = render_with(r#"<p>%%WEFT:t%%</p><script>var t="%%WEFT:t%%";</script>"#, &data);
    assert_eq!(
      html,
      r#"<p>&lt;/script&gt;&lt;img&gt;</p><script>var t="\u003c/script\u003e\u003cimg\u003e";</script>"#
    );
  }

  #[test]
  fn surrounding_bytes_untouched() {
    let template = "<div  class=\"x\"\n\tdata-k='v'>%%WEFT:a%%<!-- c --></div >";
    let html = render_with(template, &json!({"a": "1"}));
    assert_eq!(html, "<div  class=\"x\"\n\tdata-k='v'>1<!-- c --></div >");
  }

  #[test]
  fn script_ranges_case_insensitive() {
    let ranges = script_ranges("<SCRIPT type=x>ab</Script><p></p>");
    assert_eq!(ranges, vec![15..17]);
  }
}
