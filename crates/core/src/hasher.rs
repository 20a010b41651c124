//! Canonical content hashing for applied stage configurations.
//!
//! The hash only answers "did the configuration change?". It is never used as
//! a security primitive.

use crate::models::ConfigMap;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Largest magnitude at which every integral `f64` is exactly representable.
const EXACT_FLOAT_LIMIT: f64 = 9_007_199_254_740_992.0;

pub fn config_hash(config: &ConfigMap) -> String {
    let canonical = canonical_json(config);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn hashes_match(config: &ConfigMap, hash: &str) -> bool {
    config_hash(config) == hash
}

/// Compact JSON with keys sorted at every nesting level.
pub fn canonical_json(config: &ConfigMap) -> String {
    canonical_object(config).to_string()
}

fn canonical_object(map: &Map<String, Value>) -> Value {
    let mut entries = map.iter().collect::<Vec<_>>();
    entries.sort_by(|left, right| left.0.cmp(right.0));
    Value::Object(
        entries
            .into_iter()
            .map(|(key, value)| (key.clone(), canonicalize(value)))
            .collect(),
    )
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => canonical_object(map),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(number) => canonical_number(number),
        other => other.clone(),
    }
}

fn canonical_number(number: &Number) -> Value {
    match number.as_f64() {
        Some(float)
            if number.is_f64() && float.fract() == 0.0 && float.abs() < EXACT_FLOAT_LIMIT =>
        {
            Value::from(float as i64)
        }
        _ => Value::Number(number.clone()),
    }
}
