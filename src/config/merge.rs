//! Deep merge for tiered YAML configuration.
//!
//! Each tier is parsed into a `serde_json::Value` and merged field by field;
//! higher tiers win. Arrays are replaced entirely, not concatenated.

use anyhow::Result;
use serde_json::Value;
use std::path::Path;

/// Read a YAML file into a JSON value for merging.
pub fn read_yaml_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&content)?;
    Ok(value)
}

/// Deep merge two JSON values, with `overlay` taking precedence over `base`.
///
/// - Objects are merged recursively: keys in overlay override keys in base
/// - Arrays, strings, numbers, booleans, nulls are replaced entirely
/// - If overlay is null, the base value is preserved (null means "not specified")
///
/// # Example
/// ```
/// use serde_json::json;
/// use agentflow::config::deep_merge;
///
/// let base = json!({"engine": {"max_iterations": 10, "max_tokens": 1024}});
/// let overlay = json!({"engine": {"max_iterations": 3}});
/// assert_eq!(
///     deep_merge(base, overlay),
///     json!({"engine": {"max_iterations": 3, "max_tokens": 1024}})
/// );
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        // Both are objects: merge recursively
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        // Overlay is null: preserve base (null means "not specified")
        (base, Value::Null) => base,
        // Any other case: overlay replaces base entirely
        (_, overlay) => overlay,
    }
}

/// Merge multiple values in order, with later values taking precedence.
///
/// Equivalent to folding `deep_merge` over the list.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}
