/* src/server/injector/rust/src/sentinel.rs */

use serde_json::Value;

pub const SENTINEL_PREFIX: &str = "%%WEFT:";
pub const SENTINEL_SUFFIX: &str = "%%";

/// Path segment standing for "every element of this array".
pub const EACH_SEGMENT: &str = "$";

/// Encode a dotted data path as a sentinel token.
pub fn sentinel(path: &str) -> String {
  format!("{SENTINEL_PREFIX}{path}{SENTINEL_SUFFIX}")
}

fn join(prefix: &str, key: &str) -> String {
  if prefix.is_empty() { key.to_string() } else { format!("{prefix}.{key}") }
}

/// Replace every leaf of `shape` with a sentinel token carrying its dotted path.
///
/// Leaves are primitives, null, empty arrays and arrays of primitives. An
/// array whose first element is an object collapses to a single
/// representative element whose paths go through `$`. Used to render
/// preview markup from mock data; the output depends only on the input.
pub fn build_sentinel_tree(shape: &Value) -> Value {
  build(shape, "")
}

fn build(value: &Value, prefix: &str) -> Value {
  match value {
    Value::Object(map) => {
      let mut out = serde_json::Map::with_capacity(map.len());
      for (key, child) in map {
        out.insert(key.clone(), build(child, &join(prefix, key)));
      }
      Value::Object(out)
    }
    Value::Array(items) => match items.first() {
      Some(first @ Value::Object(_)) => Value::Array(vec![build(first, &join(prefix, EACH_SEGMENT))]),
      _ => Value::String(sentinel(prefix)),
    },
    _ => Value::String(sentinel(prefix)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn leaves_become_sentinels() {
    let tree = build_sentinel_tree(&json!({
      "user": {"name": "Alice", "age": 30, "admin": false, "bio": null},
      "title": "Home"
    }));
    assert_eq!(
      tree,
      json!({
        "user": {
          "name": "%%WEFT:user.name%%",
          "age": "%%WEFT:user.age%%",
          "admin": "%%WEFT:user.admin%%",
          "bio": "%%WEFT:user.bio%%"
        },
        "title": "%%WEFT:title%%"
      })
    );
  }

  #[test]
  fn object_array_collapses_to_one_element() {
    let tree = build_sentinel_tree(&json!({
      "repos": [
        {"name": "a", "stars": 1, "owner": {"login": "x"}},
        {"name": "b", "stars": 2, "owner": {"login": "y"}}
      ]
    }));
    assert_eq!(
      tree,
      json!({
        "repos": [{
          "name": "%%WEFT:repos.$.name%%",
          "stars": "%%WEFT:repos.$.stars%%",
          "owner": {"login": "%%WEFT:repos.$.owner.login%%"}
        }]
      })
    );
  }

  #[test]
  fn primitive_and_empty_arrays_are_leaves() {
    let tree = build_sentinel_tree(&json!({"tags": ["a", "b"], "empty": []}));
    assert_eq!(tree, json!({"tags": "%%WEFT:tags%%", "empty": "%%WEFT:empty%%"}));
  }

  #[test]
  fn nested_object_arrays_chain_wildcards() {
    let tree = build_sentinel_tree(&json!({
      "groups": [{"items": [{"label": "x"}]}]
    }));
    assert_eq!(tree["groups"][0]["items"][0]["label"], "%%WEFT:groups.$.items.$.label%%");
  }

  #[test]
  fn deterministic_for_identical_input() {
    let shape = json!({"a": {"b": [{"c": 1}]}, "d": [1, 2]});
    assert_eq!(build_sentinel_tree(&shape), build_sentinel_tree(&shape.clone()));
  }
}
