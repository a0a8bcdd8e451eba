/* src/server/core/rust/src/manifest.rs */

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::channel::ChannelMeta;
use crate::procedure::ProcedureDef;
use crate::schema::SchemaNode;

pub const MANIFEST_VERSION: u32 = 1;

/// Serializes a list of pairs as a JSON object, keeping list order.
pub(crate) struct Ordered<'a, V>(pub(crate) &'a [(String, V)]);

impl<V: Serialize> Serialize for Ordered<'_, V> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for (key, value) in self.0 {
      map.serialize_entry(key, value)?;
    }
    map.end()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcedureSchema {
  #[serde(rename = "type")]
  pub proc_type: &'static str,
  pub input: SchemaNode,
  pub output: SchemaNode,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<SchemaNode>,
}

/// Public description of a router. Entries appear in registration order.
#[derive(Debug, Clone)]
pub struct Manifest {
  pub version: u32,
  pub procedures: Vec<(String, ProcedureSchema)>,
  pub channels: Vec<(String, ChannelMeta)>,
}

impl Manifest {
  pub fn procedure(&self, name: &str) -> Option<&ProcedureSchema> {
    self.procedures.iter().find(|(n, _)| n == name).map(|(_, s)| s)
  }

  pub fn to_json(&self) -> String {
    serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
  }
}

impl Serialize for Manifest {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    map.serialize_entry("version", &self.version)?;
    map.serialize_entry("procedures", &Ordered(&self.procedures))?;
    if !self.channels.is_empty() {
      map.serialize_entry("channels", &Ordered(&self.channels))?;
    }
    map.end()
  }
}

pub fn build_manifest<'a>(
  procedures: impl IntoIterator<Item = &'a ProcedureDef>,
  channels: &[(String, ChannelMeta)],
) -> Manifest {
  let procedures = procedures
    .into_iter()
    .map(|proc| {
      (
        proc.name.clone(),
        ProcedureSchema {
          proc_type: proc.kind.as_str(),
          input: proc.input.clone(),
          output: proc.output.clone(),
          error: proc.error.clone(),
        },
      )
    })
    .collect();
  Manifest { version: MANIFEST_VERSION, procedures, channels: channels.to_vec() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::subscription::PushSource;
  use serde_json::{Value, json};

  fn query(name: &str) -> ProcedureDef {
    ProcedureDef::query(name, SchemaNode::any(), SchemaNode::any(), |_, _| async { Ok(Value::Null) })
  }

  #[test]
  fn command_procedure_emits_command_type() {
    let procs = [ProcedureDef::command(
      "createUser",
      SchemaNode::object([("name", SchemaNode::string())]),
      SchemaNode::boolean(),
      |_, _| async { Ok(json!(true)) },
    )];
    let manifest = build_manifest(&procs, &[]);
    let json: Value = serde_json::from_str(&manifest.to_json()).unwrap();
    assert_eq!(
      json,
      json!({
        "version": 1,
        "procedures": {
          "createUser": {
            "type": "command",
            "input": {"properties": {"name": {"type": "string"}}},
            "output": {"type": "boolean"}
          }
        }
      })
    );
  }

  #[test]
  fn error_schema_present_emits_error_field() {
    let error = SchemaNode::object([("code", SchemaNode::string())]);
    let procs = [query("risky").with_error(error.clone())];
    let json = serde_json::to_value(build_manifest(&procs, &[])).unwrap();
    assert_eq!(json["procedures"]["risky"]["error"], error.to_jtd());
  }

  #[test]
  fn error_schema_none_omits_error_field() {
    let procs = [query("safe")];
    let json = serde_json::to_value(build_manifest(&procs, &[])).unwrap();
    assert!(json["procedures"]["safe"].get("error").is_none());
    assert!(json.get("channels").is_none());
  }

  #[test]
  fn subscription_kind() {
    let procs = [ProcedureDef::subscription("onEvent", SchemaNode::any(), SchemaNode::any(), |_, _| {
      async { Ok(PushSource::new(|_sink| || {})) }
    })];
    let manifest = build_manifest(&procs, &[]);
    assert_eq!(manifest.procedure("onEvent").unwrap().proc_type, "subscription");
  }

  #[test]
  fn registration_order_is_kept() {
    let procs = [query("zeta"), query("alpha"), query("mid")];
    let text = build_manifest(&procs, &[]).to_json();
    let z = text.find("\"zeta\"").unwrap();
    let a = text.find("\"alpha\"").unwrap();
    let m = text.find("\"mid\"").unwrap();
    assert!(z < a && a < m);
  }

  #[test]
  fn identical_registration_gives_identical_output() {
    let a = build_manifest(&[query("x"), query("y")], &[]).to_json();
    let b = build_manifest(&[query("x"), query("y")], &[]).to_json();
    assert_eq!(a, b);
  }
}
