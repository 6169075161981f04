//! Layer merging.
//!
//! - Tables: deep-merge by key
//! - Arrays: replaced (last wins)
//! - Scalars: overridden (last wins)
//! - Null: ignored, so an unset CLI flag never masks a lower layer

use serde_json::Value;

/// Deep merge `overlay` onto `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                if !merged.is_null() {
                    base_map.insert(key, merged);
                }
            }
            Value::Object(base_map)
        }

        (base, Value::Null) => base,

        // arrays are replaced, not concatenated
        (_, overlay) => overlay,
    }
}

/// Merge layers in order (first is base, last has highest precedence).
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
