//! Environment-aware configuration values.
//!
//! Any scalar in `berth.toml` may be written either as a plain value or as a
//! table keyed by target:
//!
//! ```toml
//! server_type = "cx22"
//! server_type = { sandbox = "cx22", release = "cx32" }
//! server_type = { release = "cx32", default = "cx22" }
//! ```
//!
//! Resolution never fails: a table with neither an entry for the target nor a
//! `default` key resolves to `None`, which callers read as "not configured for
//! this target".

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key consulted when a per-target table has no entry for the requested target.
pub const DEFAULT_KEY: &str = "default";

/// The deployment context a value is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Sandbox,
    Release,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Sandbox => "sandbox",
            Target::Release => "release",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration scalar that may vary per target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue<T> {
    Scalar(T),
    PerTarget(BTreeMap<String, T>),
}

impl<T: Clone> EnvValue<T> {
    /// Resolve this value for `target`.
    pub fn resolve(&self, target: Target) -> Option<T> {
        match self {
            EnvValue::Scalar(value) => Some(value.clone()),
            EnvValue::PerTarget(map) => map
                .get(target.as_str())
                .or_else(|| map.get(DEFAULT_KEY))
                .cloned(),
        }
    }

    /// Build a per-target value from explicit entries.
    pub fn per_target<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
    {
        EnvValue::PerTarget(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<T> From<T> for EnvValue<T> {
    fn from(value: T) -> Self {
        EnvValue::Scalar(value)
    }
}

impl From<&str> for EnvValue<String> {
    fn from(value: &str) -> Self {
        EnvValue::Scalar(value.to_string())
    }
}

/// Free-function form of [`EnvValue::resolve`].
pub fn resolve<T: Clone>(value: &EnvValue<T>, target: Target) -> Option<T> {
    value.resolve(target)
}

/// Resolve an optional value, flattening "absent" and "not configured".
pub fn resolve_opt<T: Clone>(value: Option<&EnvValue<T>>, target: Target) -> Option<T> {
    value.and_then(|v| v.resolve(target))
}

/// Resolve every entry of an environment map, dropping entries not
/// configured for `target`.
pub fn resolve_map(
    map: &BTreeMap<String, EnvValue<String>>,
    target: Target,
) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(key, value)| value.resolve(target).map(|v| (key.clone(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_resolves_for_any_target() {
        let value: EnvValue<String> = "cx22".into();
        assert_eq!(resolve(&value, Target::Sandbox).as_deref(), Some("cx22"));
        assert_eq!(resolve(&value, Target::Release).as_deref(), Some("cx22"));
    }

    #[test]
    fn per_target_picks_entry() {
        let value = EnvValue::per_target([("sandbox", "cx22".to_string()), ("release", "cx32".to_string())]);
        assert_eq!(resolve(&value, Target::Release).as_deref(), Some("cx32"));
        assert_eq!(resolve(&value, Target::Sandbox).as_deref(), Some("cx22"));
    }

    #[test]
    fn missing_entry_without_default_is_none() {
        let value = EnvValue::per_target([("sandbox", "x".to_string())]);
        assert_eq!(resolve(&value, Target::Release), None);
    }

    #[test]
    fn default_key_fills_gaps() {
        let value = EnvValue::per_target([("release", 3u32), ("default", 1u32)]);
        assert_eq!(resolve(&value, Target::Release), Some(3));
        assert_eq!(resolve(&value, Target::Sandbox), Some(1));
    }

    #[test]
    fn parses_both_forms_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            a: EnvValue<String>,
            b: EnvValue<String>,
            c: EnvValue<u16>,
        }
        let doc: Doc = toml::from_str(
            r#"
a = "plain"
b = { sandbox = "small", release = "large" }
c = { release = 8080 }
"#,
        )
        .unwrap();
        assert_eq!(doc.a.resolve(Target::Release).as_deref(), Some("plain"));
        assert_eq!(doc.b.resolve(Target::Sandbox).as_deref(), Some("small"));
        assert_eq!(doc.c.resolve(Target::Release), Some(8080));
        assert_eq!(doc.c.resolve(Target::Sandbox), None);
    }

    #[test]
    fn resolve_map_drops_unconfigured_keys() {
        let mut env = BTreeMap::new();
        env.insert("RAILS_ENV".to_string(), EnvValue::per_target([("sandbox", "development".to_string()), ("release", "production".to_string())]));
        env.insert("DEBUG".to_string(), EnvValue::per_target([("sandbox", "1".to_string())]));
        let resolved = resolve_map(&env, Target::Release);
        assert_eq!(resolved.get("RAILS_ENV").map(String::as_str), Some("production"));
        assert!(!resolved.contains_key("DEBUG"));
    }
}
