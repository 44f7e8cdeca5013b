//! Dotted-path flattening of nested property trees.
//!
//! Device tags, reported properties and simulation model properties are
//! arbitrary JSON trees. Each leaf becomes one name equal to the path of
//! keys leading to it, joined with `.`:
//!
//! ```text
//! { "Config": { "Interval": 5, "Mode": "eco" }, "Type": "Chiller" }
//!   => Config.Interval, Config.Mode, Type
//! ```
//!
//! Objects are the only nodes that recurse. Scalars, `null` and arrays are
//! leaves.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Add the leaf paths of `value`, rooted at `path`, to `names`.
pub fn flatten_value(names: &mut BTreeSet<String>, path: &str, value: &Value) {
    match value {
        Value::Object(children) => {
            for (key, child) in children {
                flatten_value(names, &format!("{}.{}", path, key), child);
            }
        }
        _ => {
            names.insert(path.to_string());
        }
    }
}

/// Add the leaf paths of every top-level property in `properties` to `names`.
pub fn flatten_properties(names: &mut BTreeSet<String>, properties: &Map<String, Value>) {
    for (key, value) in properties {
        flatten_value(names, key, value);
    }
}
