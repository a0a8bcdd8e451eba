/* src/server/core/rust/src/config.rs */

use crate::schema::{ValidationLimits, ValidationOptions};

pub const ENV_DEV: &str = "WEFT_DEV";
pub const ENV_STRICT_INPUT: &str = "WEFT_STRICT_INPUT";
pub const ENV_VALIDATE_OUTPUT: &str = "WEFT_VALIDATE_OUTPUT";

/// Runtime switches for a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeftConfig {
  /// Enables template hot reload and, unless overridden, output validation.
  pub dev_mode: bool,
  /// Reject undeclared fields in procedure input.
  pub strict_input: bool,
  /// Check handler results against the declared output schema.
  pub validate_output: bool,
  pub limits: ValidationLimits,
  /// Element id of the embedded page data script.
  pub data_id: String,
}

impl Default for WeftConfig {
  fn default() -> Self {
    Self {
      dev_mode: false,
      strict_input: false,
      validate_output: false,
      limits: ValidationLimits::default(),
      data_id: weft_injector::DEFAULT_DATA_ID.to_string(),
    }
  }
}

fn parse_flag(raw: &str) -> Option<bool> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" | "" => Some(false),
    _ => None,
  }
}

impl WeftConfig {
  /// Read `WEFT_DEV`, `WEFT_STRICT_INPUT` and `WEFT_VALIDATE_OUTPUT`.
  /// Output validation follows dev mode unless set explicitly.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let flag = |key: &str| {
      let raw = lookup(key)?;
      let parsed = parse_flag(&raw);
      if parsed.is_none() {
        tracing::warn!(key, value = %raw, "ignoring unrecognized boolean");
      }
      parsed
    };
    let dev_mode = flag(ENV_DEV).unwrap_or(false);
    Self {
      dev_mode,
      strict_input: flag(ENV_STRICT_INPUT).unwrap_or(false),
      validate_output: flag(ENV_VALIDATE_OUTPUT).unwrap_or(dev_mode),
      ..Self::default()
    }
  }

  pub fn dev() -> Self {
    Self { dev_mode: true, validate_output: true, ..Self::default() }
  }

  pub(crate) fn input_options(&self) -> ValidationOptions {
    ValidationOptions { strict: self.strict_input, limits: self.limits }
  }

  pub(crate) fn output_options(&self) -> ValidationOptions {
    ValidationOptions { strict: false, limits: self.limits }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
      pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    move |key: &str| map.get(key).cloned()
  }

  #[test]
  fn defaults_are_production() {
    let cfg = WeftConfig::from_lookup(lookup(&[]));
    assert_eq!(cfg, WeftConfig::default());
    assert_eq!(cfg.data_id, "__data");
  }

  #[test]
  fn dev_mode_enables_output_validation() {
    let cfg = WeftConfig::from_lookup(lookup(&[(ENV_DEV, "1")]));
    assert!(cfg.dev_mode);
    assert!(cfg.validate_output);
  }

  #[test]
  fn explicit_output_flag_overrides_dev() {
    let cfg = WeftConfig::from_lookup(lookup(&[(ENV_DEV, "true"), (ENV_VALIDATE_OUTPUT, "off")]));
    assert!(cfg.dev_mode);
    assert!(!cfg.validate_output);
  }

  #[test]
  fn unrecognized_values_fall_back() {
    let cfg = WeftConfig::from_lookup(lookup(&[(ENV_STRICT_INPUT, "maybe")]));
    assert!(!cfg.strict_input);
    let cfg = WeftConfig::from_lookup(lookup(&[(ENV_STRICT_INPUT, "YES")]));
    assert!(cfg.strict_input);
  }
}
