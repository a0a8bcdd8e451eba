/* src/server/core/rust/src/schema.rs */

//! Structural schemas for RPC payloads, serialized as JSON Type Definition.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
  String,
  Boolean,
  Int8,
  Int16,
  Int32,
  Uint8,
  Uint16,
  Uint32,
  Float32,
  Float64,
  Timestamp,
}

impl LeafKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::String => "string",
      Self::Boolean => "boolean",
      Self::Int8 => "int8",
      Self::Int16 => "int16",
      Self::Int32 => "int32",
      Self::Uint8 => "uint8",
      Self::Uint16 => "uint16",
      Self::Uint32 => "uint32",
      Self::Float32 => "float32",
      Self::Float64 => "float64",
      Self::Timestamp => "timestamp",
    }
  }

  /// Inclusive bounds for the integer kinds.
  fn int_range(self) -> Option<(i64, i64)> {
    match self {
      Self::Int8 => Some((i64::from(i8::MIN), i64::from(i8::MAX))),
      Self::Int16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
      Self::Int32 => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
      Self::Uint8 => Some((0, i64::from(u8::MAX))),
      Self::Uint16 => Some((0, i64::from(u16::MAX))),
      Self::Uint32 => Some((0, i64::from(u32::MAX))),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
  pub name: String,
  pub schema: SchemaNode,
}

impl Field {
  pub fn is_optional(&self) -> bool {
    matches!(self.schema, SchemaNode::Optional(_))
  }
}

/// A schema tree. Built once at registration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
  /// The empty form: accepts any value.
  Any,
  Leaf(LeafKind),
  Object(Vec<Field>),
  Array(Box<SchemaNode>),
  /// Inside an object: the field may be absent. Elsewhere: the inner schema.
  Optional(Box<SchemaNode>),
  Nullable(Box<SchemaNode>),
  Enum(Vec<String>),
  DiscriminatedUnion { tag: String, variants: Vec<(String, SchemaNode)> },
  /// String-keyed record with uniform values.
  Values(Box<SchemaNode>),
}

impl SchemaNode {
  pub fn leaf(kind: LeafKind) -> Self {
    Self::Leaf(kind)
  }

  pub fn any() -> Self {
    Self::Any
  }

  pub fn string() -> Self {
    Self::Leaf(LeafKind::String)
  }

  pub fn boolean() -> Self {
    Self::Leaf(LeafKind::Boolean)
  }

  pub fn int8() -> Self {
    Self::Leaf(LeafKind::Int8)
  }

  pub fn int16() -> Self {
    Self::Leaf(LeafKind::Int16)
  }

  pub fn int32() -> Self {
    Self::Leaf(LeafKind::Int32)
  }

  pub fn uint8() -> Self {
    Self::Leaf(LeafKind::Uint8)
  }

  pub fn uint16() -> Self {
    Self::Leaf(LeafKind::Uint16)
  }

  pub fn uint32() -> Self {
    Self::Leaf(LeafKind::Uint32)
  }

  pub fn float32() -> Self {
    Self::Leaf(LeafKind::Float32)
  }

  pub fn float64() -> Self {
    Self::Leaf(LeafKind::Float64)
  }

  pub fn timestamp() -> Self {
    Self::Leaf(LeafKind::Timestamp)
  }

  pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, SchemaNode)>) -> Self {
    Self::Object(
      fields.into_iter().map(|(name, schema)| Field { name: name.into(), schema }).collect(),
    )
  }

  pub fn optional(inner: SchemaNode) -> Self {
    Self::Optional(Box::new(inner))
  }

  pub fn nullable(inner: SchemaNode) -> Self {
    Self::Nullable(Box::new(inner))
  }

  pub fn array(element: SchemaNode) -> Self {
    Self::Array(Box::new(element))
  }

  pub fn enumeration<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
    Self::Enum(values.into_iter().map(Into::into).collect())
  }

  /// Variants are expected to be object schemas; the tag field is implied.
  pub fn discriminated_union<K: Into<String>>(
    tag: impl Into<String>,
    variants: impl IntoIterator<Item = (K, SchemaNode)>,
  ) -> Self {
    Self::DiscriminatedUnion {
      tag: tag.into(),
      variants: variants.into_iter().map(|(k, v)| (k.into(), v)).collect(),
    }
  }

  pub fn values(inner: SchemaNode) -> Self {
    Self::Values(Box::new(inner))
  }

  /// Fields of an object schema, looking through optional/nullable wrappers.
  pub fn fields(&self) -> Option<&[Field]> {
    match self {
      Self::Object(fields) => Some(fields),
      Self::Optional(inner) | Self::Nullable(inner) => inner.fields(),
      _ => None,
    }
  }

  /// JTD form as a JSON value. Key order inside the value is not preserved;
  /// serialize the node directly when order matters.
  pub fn to_jtd(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }

  fn write_form<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
    match self {
      Self::Any => Ok(()),
      Self::Leaf(kind) => map.serialize_entry("type", kind.as_str()),
      Self::Object(fields) => {
        let has_required = fields.iter().any(|f| !f.is_optional());
        let has_optional = fields.iter().any(Field::is_optional);
        if has_required || !has_optional {
          map.serialize_entry("properties", &Properties { fields, optional: false })?;
        }
        if has_optional {
          map.serialize_entry("optionalProperties", &Properties { fields, optional: true })?;
        }
        Ok(())
      }
      Self::Array(inner) => map.serialize_entry("elements", inner.as_ref()),
      Self::Optional(inner) => inner.write_form(map),
      Self::Nullable(inner) => {
        inner.write_form(map)?;
        map.serialize_entry("nullable", &true)
      }
      Self::Enum(values) => map.serialize_entry("enum", values),
      Self::DiscriminatedUnion { tag, variants } => {
        map.serialize_entry("discriminator", tag)?;
        map.serialize_entry("mapping", &Mapping(variants))
      }
      Self::Values(inner) => map.serialize_entry("values", inner.as_ref()),
    }
  }
}

impl Serialize for SchemaNode {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    self.write_form(&mut map)?;
    map.end()
  }
}

struct Properties<'a> {
  fields: &'a [Field],
  optional: bool,
}

impl Serialize for Properties<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    for field in self.fields.iter().filter(|f| f.is_optional() == self.optional) {
      map.serialize_entry(&field.name, &field.schema)?;
    }
    map.end()
  }
}

struct Mapping<'a>(&'a [(String, SchemaNode)]);

impl Serialize for Mapping<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for (name, schema) in self.0 {
      map.serialize_entry(name, schema)?;
    }
    map.end()
  }
}

// -- Validation --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
  pub max_depth: usize,
  pub max_errors: usize,
}

impl Default for ValidationLimits {
  fn default() -> Self {
    Self { max_depth: 64, max_errors: 32 }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
  /// Reject object fields the schema does not declare.
  pub strict: bool,
  pub limits: ValidationLimits,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationErrorKind {
  #[error("expected {expected}, found {found}")]
  TypeMismatch { expected: String, found: &'static str },
  #[error("missing required field")]
  MissingField,
  #[error("unexpected field")]
  UnexpectedField,
  #[error("value {value:?} is not one of {allowed:?}")]
  EnumMismatch { value: String, allowed: Vec<String> },
  #[error("unknown discriminator {value:?} for tag {tag:?}")]
  UnknownDiscriminator { tag: String, value: String },
  #[error("{value} is out of range for {kind}")]
  OutOfRange { kind: &'static str, value: String },
  #[error("maximum nesting depth exceeded")]
  DepthExceeded,
}

/// One failure, located by a JSON Pointer into the payload (`""` is the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
  pub path: String,
  pub kind: ValidationErrorKind,
}

impl std::fmt::Display for ValidationError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let path = if self.path.is_empty() { "/" } else { &self.path };
    write!(f, "{path}: {}", self.kind)
  }
}

impl std::error::Error for ValidationError {}

/// Validate `value` against `schema`. Errors come out in traversal order:
/// declared fields first, then unexpected fields in key order.
pub fn validate(
  schema: &SchemaNode,
  value: &Value,
  options: &ValidationOptions,
) -> Vec<ValidationError> {
  let mut v = Validator { options, errors: Vec::new() };
  let mut path = String::new();
  v.visit(schema, value, &mut path, 0);
  v.errors
}

/// Human-readable summary used as the message of a VALIDATION_ERROR.
pub fn summarize(errors: &[ValidationError]) -> String {
  let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
  format!("Input validation failed: {}", parts.join("; "))
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

fn push_segment(path: &mut String, segment: &str) {
  path.push('/');
  for ch in segment.chars() {
    match ch {
      '~' => path.push_str("~0"),
      '/' => path.push_str("~1"),
      c => path.push(c),
    }
  }
}

struct Validator<'o> {
  options: &'o ValidationOptions,
  errors: Vec<ValidationError>,
}

impl Validator<'_> {
  fn full(&self) -> bool {
    self.errors.len() >= self.options.limits.max_errors
  }

  fn report(&mut self, path: &str, kind: ValidationErrorKind) {
    if !self.full() {
      self.errors.push(ValidationError { path: path.to_string(), kind });
    }
  }

  fn mismatch(&mut self, path: &str, expected: &str, value: &Value) {
    self.report(
      path,
      ValidationErrorKind::TypeMismatch { expected: expected.to_string(), found: type_name(value) },
    );
  }

  fn visit(&mut self, schema: &SchemaNode, value: &Value, path: &mut String, depth: usize) {
    if self.full() {
      return;
    }
    if depth > self.options.limits.max_depth {
      self.report(path, ValidationErrorKind::DepthExceeded);
      return;
    }
    match schema {
      SchemaNode::Any => {}
      SchemaNode::Leaf(kind) => self.visit_leaf(*kind, value, path),
      SchemaNode::Optional(inner) => self.visit(inner, value, path, depth),
      SchemaNode::Nullable(inner) => {
        if !value.is_null() {
          self.visit(inner, value, path, depth);
        }
      }
      SchemaNode::Enum(allowed) => match value.as_str() {
        Some(s) if allowed.iter().any(|a| a == s) => {}
        Some(s) => self.report(
          path,
          ValidationErrorKind::EnumMismatch { value: s.to_string(), allowed: allowed.clone() },
        ),
        None => self.mismatch(path, "enum string", value),
      },
      SchemaNode::Array(element) => {
        let Some(items) = value.as_array() else {
          self.mismatch(path, "array", value);
          return;
        };
        for (idx, item) in items.iter().enumerate() {
          let len = path.len();
          push_segment(path, &idx.to_string());
          self.visit(element, item, path, depth + 1);
          path.truncate(len);
          if self.full() {
            return;
          }
        }
      }
      SchemaNode::Values(inner) => {
        let Some(map) = value.as_object() else {
          self.mismatch(path, "object", value);
          return;
        };
        for (key, item) in map {
          let len = path.len();
          push_segment(path, key);
          self.visit(inner, item, path, depth + 1);
          path.truncate(len);
        }
      }
      SchemaNode::Object(fields) => self.visit_object(fields, None, value, path, depth),
      SchemaNode::DiscriminatedUnion { tag, variants } => {
        self.visit_union(tag, variants, value, path, depth);
      }
    }
  }

  fn visit_leaf(&mut self, kind: LeafKind, value: &Value, path: &str) {
    match kind {
      LeafKind::String | LeafKind::Timestamp => {
        if !value.is_string() {
          self.mismatch(path, kind.as_str(), value);
        }
      }
      LeafKind::Boolean => {
        if !value.is_boolean() {
          self.mismatch(path, kind.as_str(), value);
        }
      }
      LeafKind::Float32 | LeafKind::Float64 => {
        if !value.is_number() {
          self.mismatch(path, kind.as_str(), value);
        }
      }
      _ => self.visit_integer(kind, value, path),
    }
  }

  fn visit_integer(&mut self, kind: LeafKind, value: &Value, path: &str) {
    let Some(n) = value.as_number() else {
      self.mismatch(path, kind.as_str(), value);
      return;
    };
    let Some((min, max)) = kind.int_range() else { return };
    // Integral floats such as `3.0` count as integers.
    let int = if let Some(i) = n.as_i64() {
      i128::from(i)
    } else if let Some(u) = n.as_u64() {
      i128::from(u)
    } else {
      match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() >= 1e18 => i128::MAX,
        Some(f) if f.fract() == 0.0 => {
          #[allow(clippy::cast_possible_truncation)]
          let i = f as i64;
          i128::from(i)
        }
        _ => {
          self.mismatch(path, kind.as_str(), value);
          return;
        }
      }
    };
    if int < i128::from(min) || int > i128::from(max) {
      self.report(path, ValidationErrorKind::OutOfRange { kind: kind.as_str(), value: n.to_string() });
    }
  }

  fn visit_object(
    &mut self,
    fields: &[Field],
    tag: Option<&str>,
    value: &Value,
    path: &mut String,
    depth: usize,
  ) {
    let Some(map) = value.as_object() else {
      self.mismatch(path, "object", value);
      return;
    };
    for field in fields {
      let len = path.len();
      push_segment(path, &field.name);
      match map.get(&field.name) {
        Some(v) => self.visit(&field.schema, v, path, depth + 1),
        None if field.is_optional() => {}
        None => self.report(path, ValidationErrorKind::MissingField),
      }
      path.truncate(len);
      if self.full() {
        return;
      }
    }
    if !self.options.strict {
      return;
    }
    for key in map.keys() {
      if Some(key.as_str()) == tag || fields.iter().any(|f| &f.name == key) {
        continue;
      }
      let len = path.len();
      push_segment(path, key);
      self.report(path, ValidationErrorKind::UnexpectedField);
      path.truncate(len);
    }
  }

  fn visit_union(
    &mut self,
    tag: &str,
    variants: &[(String, SchemaNode)],
    value: &Value,
    path: &mut String,
    depth: usize,
  ) {
    let Some(map) = value.as_object() else {
      self.mismatch(path, "object", value);
      return;
    };
    let len = path.len();
    push_segment(path, tag);
    let variant = match map.get(tag) {
      None => {
        self.report(path, ValidationErrorKind::MissingField);
        None
      }
      Some(Value::String(name)) => {
        let found = variants.iter().find(|(v, _)| v == name).map(|(_, s)| s);
        if found.is_none() {
          self.report(
            path,
            ValidationErrorKind::UnknownDiscriminator { tag: tag.to_string(), value: name.clone() },
          );
        }
        found
      }
      Some(other) => {
        self.mismatch(path, "string", other);
        None
      }
    };
    path.truncate(len);
    match variant.map(|s| (s, s.fields())) {
      Some((_, Some(fields))) => self.visit_object(fields, Some(tag), value, path, depth),
      Some((schema, None)) => self.visit(schema, value, path, depth),
      None => {}
    }
  }
}
