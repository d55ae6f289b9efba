//! Layered YAML configuration with a canonicalized hash for audit logging,
//! plus environment-only secret resolution. Mirrors the teacher's
//! deep-merge + canonicalize-and-hash config crate.

mod secrets;

pub use secrets::{resolve_secrets_for_mode, BrokerMode, ResolvedSecrets};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Deep-merges a base YAML file with an optional environment override file
/// (later files win on key conflicts), then canonicalizes (recursively
/// sorted object keys) and hashes the result so operators can log "which
/// config was active" without printing the whole document.
pub fn load_layered_yaml(paths: &[&Path]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for path in paths {
        if !path.exists() {
            continue;
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let layer: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing yaml in {}", path.display()))?;
        deep_merge(&mut merged, layer);
    }

    let canonical = canonicalize(&merged);
    let canonical_json = serde_json::to_string(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    let config_hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: merged,
        canonical_json,
        config_hash,
    })
}

fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                deep_merge(base_map.entry(k).or_insert(Value::Null), v);
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overlays_nested_keys() {
        let mut base: Value = serde_json::json!({"risk": {"max_position_pct": 0.15, "max_spread_bps": 50}});
        let overlay: Value = serde_json::json!({"risk": {"max_position_pct": 0.20}});
        deep_merge(&mut base, overlay);
        assert_eq!(base["risk"]["max_position_pct"], 0.20);
        assert_eq!(base["risk"]["max_spread_bps"], 50);
    }

    #[test]
    fn canonicalize_is_stable_under_key_reordering() {
        let a: Value = serde_json::json!({"b": 1, "a": 2});
        let b: Value = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            serde_json::to_string(&canonicalize(&a)).unwrap(),
            serde_json::to_string(&canonicalize(&b)).unwrap()
        );
    }
}
