/* src/server/core/rust/src/route.rs */

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  Param(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
  #[error("route pattern must start with '/': {0}")]
  NotAbsolute(String),
  #[error("route pattern {pattern} has an empty parameter name")]
  EmptyParam { pattern: String },
  #[error("route pattern {pattern} repeats parameter :{param}")]
  DuplicateParam { pattern: String, param: String },
  #[error("route pattern {pattern} is unreachable: shadowed by {earlier}")]
  Shadowed { pattern: String, earlier: String },
}

struct Entry<T> {
  pattern: String,
  segments: Vec<Segment>,
  value: T,
}

/// A successful match.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
  pub pattern: &'a str,
  pub params: BTreeMap<String, String>,
  pub value: &'a T,
}

/// Segment-wise path matcher. Patterns are `/`-separated literals and
/// `:name` parameters; the first registered pattern that fits wins.
pub struct RouteMatcher<T> {
  entries: Vec<Entry<T>>,
}

impl<T> Default for RouteMatcher<T> {
  fn default() -> Self {
    Self { entries: Vec::new() }
  }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
  path.split('/').filter(|s| !s.is_empty())
}

fn parse(pattern: &str) -> Result<Vec<Segment>, RouteError> {
  if !pattern.starts_with('/') {
    return Err(RouteError::NotAbsolute(pattern.to_string()));
  }
  let mut segments = Vec::new();
  for raw in split(pattern) {
    let segment = match raw.strip_prefix(':') {
      Some("") => return Err(RouteError::EmptyParam { pattern: pattern.to_string() }),
      Some(name) => {
        if segments.iter().any(|s| matches!(s, Segment::Param(p) if p == name)) {
          return Err(RouteError::DuplicateParam {
            pattern: pattern.to_string(),
            param: name.to_string(),
          });
        }
        Segment::Param(name.to_string())
      }
      None => Segment::Literal(raw.to_string()),
    };
    segments.push(segment);
  }
  Ok(segments)
}

/// True when every path matched by `later` is already matched by `earlier`.
fn covers(earlier: &[Segment], later: &[Segment]) -> bool {
  earlier.len() == later.len()
    && earlier.iter().zip(later).all(|(e, l)| match (e, l) {
      (Segment::Param(_), _) => true,
      (Segment::Literal(a), Segment::Literal(b)) => a == b,
      (Segment::Literal(_), Segment::Param(_)) => false,
    })
}

impl<T> RouteMatcher<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, pattern: &str, value: T) -> Result<(), RouteError> {
    let segments = parse(pattern)?;
    if let Some(earlier) = self.entries.iter().find(|e| covers(&e.segments, &segments)) {
      return Err(RouteError::Shadowed {
        pattern: pattern.to_string(),
        earlier: earlier.pattern.clone(),
      });
    }
    self.entries.push(Entry { pattern: pattern.to_string(), segments, value });
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Match a pathname (no query string). Segment counts must be equal.
  pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_, T>> {
    let parts: Vec<&str> = split(path).collect();
    self.entries.iter().find_map(|entry| {
      if entry.segments.len() != parts.len() {
        return None;
      }
      let mut params = BTreeMap::new();
      for (segment, part) in entry.segments.iter().zip(&parts) {
        match segment {
          Segment::Literal(lit) if lit == part => {}
          Segment::Literal(_) => return None,
          Segment::Param(name) => {
            params.insert(name.clone(), (*part).to_string());
          }
        }
      }
      Some(RouteMatch { pattern: &entry.pattern, params, value: &entry.value })
    })
  }
}
