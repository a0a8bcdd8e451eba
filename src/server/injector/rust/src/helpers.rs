/* src/server/injector/rust/src/helpers.rs */

use serde_json::{Number, Value};

/// Render a scalar the way the client renderer prints it as text.
/// Null renders empty, integral floats drop their fraction (`3.0` -> `3`).
pub(crate) fn stringify(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => stringify_number(n),
    Value::String(s) => s.clone(),
    // Arrays of primitives join with "," like `String(array)` on the client
    Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
    other => other.to_string(),
  }
}

fn stringify_number(n: &Number) -> String {
  if n.is_i64() || n.is_u64() {
    return n.to_string();
  }
  match n.as_f64() {
    Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
    Some(f) => f.to_string(),
    None => n.to_string(),
  }
}

/// General markup escaping for text and attribute positions.
pub fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#x27;"),
      c => out.push(c),
    }
  }
  out
}

/// Escaping for text that lands inside a `<script>` element.
///
/// Angle brackets and ampersands become `\uXXXX` escapes, so neither a
/// `</script>` sequence nor an HTML comment opener can survive. The line and
/// paragraph separators are escaped because JS string literals reject them raw.
/// Applied to JSON text the result is still valid JSON with identical meaning.
pub fn escape_script(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    match ch {
      '<' => out.push_str("\\u003c"),
      '>' => out.push_str("\\u003e"),
      '&' => out.push_str("\\u0026"),
      '\u{2028}' => out.push_str("\\u2028"),
      '\u{2029}' => out.push_str("\\u2029"),
      c => out.push(c),
    }
  }
  out
}

/// Escape non-ASCII characters in JSON string values to `\uXXXX` sequences.
///
/// Walks the JSON text tracking whether the current position is inside a
/// JSON string (handling `\"` and `\\` correctly). Chars outside the BMP are
/// encoded as surrogate pairs.
pub fn ascii_escape_json(json: &str) -> String {
  let mut out = String::with_capacity(json.len());
  let mut in_string = false;
  let mut chars = json.chars();

  while let Some(ch) = chars.next() {
    if !in_string {
      if ch == '"' {
        in_string = true;
      }
      out.push(ch);
      continue;
    }
    match ch {
      '\\' => {
        out.push(ch);
        if let Some(next) = chars.next() {
          out.push(next);
        }
      }
      '"' => {
        in_string = false;
        out.push(ch);
      }
      c if c as u32 > 0x7F => {
        let code = c as u32;
        if code > 0xFFFF {
          let adjusted = code - 0x1_0000;
          let hi = (adjusted >> 10) + 0xD800;
          let lo = (adjusted & 0x3FF) + 0xDC00;
          out.push_str(&format!("\\u{hi:04x}\\u{lo:04x}"));
        } else {
          out.push_str(&format!("\\u{code:04x}"));
        }
      }
      c => out.push(c),
    }
  }
  out
}
