/* src/server/injector/rust/src/lib.rs */

mod helpers;
mod render;
mod sentinel;

use serde_json::Value;

pub use helpers::{ascii_escape_json, escape_html, escape_script};
pub use sentinel::{EACH_SEGMENT, SENTINEL_PREFIX, SENTINEL_SUFFIX, build_sentinel_tree, sentinel};

use render::{FragmentMap, render};

/// Marker a template may carry to pin where the data script goes.
pub const DATA_MARKER: &str = "<!--weft:data-->";

pub const DEFAULT_DATA_ID: &str = "__data";

/// Substitute sentinel tokens only; no data script is embedded.
/// For callers that deliver the payload over a separate channel.
pub fn inject_no_script(template: &str, data: &Value) -> String {
  render(template, &FragmentMap::build(data))
}

/// Substitute sentinel tokens from `data` and embed `data` itself as the
/// JSON payload under `data_id`.
pub fn inject(template: &str, data: &Value, data_id: &str) -> String {
  inject_with_payload(template, data, data, data_id)
}

/// Substitute tokens from `slot_data` but embed a different `payload`.
/// Pages resolve tokens against flattened loader results while the
/// embedded payload keeps the `_layouts` grouping the client expects.
pub fn inject_with_payload(
  template: &str,
  slot_data: &Value,
  payload: &Value,
  data_id: &str,
) -> String {
  let html = inject_no_script(template, slot_data);
  insert_data_script(&html, &data_script(data_id, payload))
}

/// Serialize `payload` into a `<script type="application/json">` element.
pub fn data_script(data_id: &str, payload: &Value) -> String {
  let json = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
  let escaped = ascii_escape_json(&escape_script(&json));
  format!(r#"<script id="{}" type="application/json">{escaped}</script>"#, escape_html(data_id))
}

/// Place a data script at the data marker, else before `</body>`, else at the end.
pub fn insert_data_script(html: &str, script: &str) -> String {
  if let Some(pos) = html.find(DATA_MARKER) {
    let mut result = String::with_capacity(html.len() + script.len());
    result.push_str(&html[..pos]);
    result.push_str(script);
    result.push_str(&html[pos + DATA_MARKER.len()..]);
    return result;
  }
  if let Some(pos) = html.rfind("</body>") {
    let mut result = String::with_capacity(html.len() + script.len());
    result.push_str(&html[..pos]);
    result.push_str(script);
    result.push_str(&html[pos..]);
    return result;
  }
  format!("{html}{script}")
}

/// Recover the payload embedded by [`inject`] under `data_id`.
pub fn extract_data(html: &str, data_id: &str) -> Option<Value> {
  let open = format!(r#"<script id="{}" type="application/json">"#, escape_html(data_id));
  let start = html.find(&open)? + open.len();
  let end = start + html[start..].find("</script>")?;
  serde_json::from_str(&html[start..end]).ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn inject_places_script_before_body_close() {
    let html = inject("<html><body><p>%%WEFT:a%%</p></body></html>", &json!({"a": 1}), "__data");
    assert_eq!(
      html,
      r#"<html><body><p>1</p><script id="__data" type="application/json">{"a":1}</script></body></html>"#
    );
  }

  #[test]
  fn inject_uses_data_marker_when_present() {
    let html = inject("<body><!--weft:data--><p>x</p></body>", &json!({}), "d");
    assert_eq!(html, r#"<body><script id="d" type="application/json">{}</script><p>x</p></body>"#);
  }

  #[test]
  fn inject_appends_without_body() {
    let html = inject("<p>%%WEFT:a%%</p>", &json!({"a": "b"}), "d");
    assert_eq!(html, r#"<p>b</p><script id="d" type="application/json">{"a":"b"}</script>"#);
  }

  #[test]
  fn inject_no_script_omits_payload() {
    let html = inject_no_script("<body>%%WEFT:a%%</body>", &json!({"a": "x"}));
    assert_eq!(html, "<body>x</body>");
  }

  #[test]
  fn payload_cannot_close_script_early() {
    let data = json!({"evil": "</script><script>alert(1)</script>"});
    let html = inject("<body></body>", &data, "__data");
    assert_eq!(html.matches("</script>").count(), 1);
  }

  #[test]
  fn round_trip_reproduces_data() {
    let data = json!({
      "user": {"name": "Zoë <admin>", "bio": "a & b\u{2028}", "tags": ["x", "y"]},
      "count": 3,
      "ratio": 0.25,
      "missing": null,
      "emoji": "😀",
      "_layouts": {"root": {"nav": [{"href": "/", "label": "Home"}]}}
    });
    let html = inject("<html><body><h1>%%WEFT:user.name%%</h1></body></html>", &data, "__data");
    assert_eq!(extract_data(&html, "__data"), Some(data));
  }

  #[test]
  fn extract_data_missing_id() {
    let html = inject("<body></body>", &json!({"a": 1}), "__data");
    assert_eq!(extract_data(&html, "other"), None);
  }

  #[test]
  fn inject_with_payload_splits_slots_and_script() {
    let slots = json!({"title": "Hi", "page": {"title": "Hi"}});
    let payload = json!({"page": {"title": "Hi"}});
    let html = inject_with_payload("<body>%%WEFT:title%%</body>", &slots, &payload, "__data");
    assert!(html.starts_with("<body>Hi<script"));
    assert_eq!(extract_data(&html, "__data"), Some(payload));
  }
}
