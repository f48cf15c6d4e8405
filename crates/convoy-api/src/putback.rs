//! Conservative JSON merge for PUTs against servers that may know fields
//! we don't.
//!
//! We serialize our view of a resource, diff it against the view captured
//! when the resource was retrieved, and apply only those changes to the
//! JSON as originally received. Fields that never round-tripped through
//! our structs (additive API changes) are left untouched. Lists of all
//! kinds are compared as a unit.

use serde_json::{Map, Value};

/// Merge `changed` into `original`, using `base` as the shared ancestor.
///
/// `original` is the JSON as received; `base` is the round-trip of the
/// struct captured at retrieve time; `changed` is the serialization of
/// the updated struct.
pub fn putback_json(original: &Value, base: &Value, changed: &Value) -> Value {
    let mut target = original.clone();
    let (Some(base_map), Some(changed_map)) = (base.as_object(), changed.as_object()) else {
        // Non-object roots have no unknown fields to preserve.
        return changed.clone();
    };
    let target_map = match target.as_object_mut() {
        Some(map) => map,
        None => return changed.clone(),
    };
    apply_changes(base_map, changed_map, target_map);
    target
}

/// Apply `changed - base` onto `target`, recursing into nested objects.
fn apply_changes(
    base: &Map<String, Value>,
    changed: &Map<String, Value>,
    target: &mut Map<String, Value>,
) {
    for (key, value) in changed {
        match value {
            Value::Object(changed_sub) => match base.get(key) {
                Some(Value::Object(base_sub)) => {
                    let entry = target
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        // The server changed the type under us; our view
                        // wins.
                        *entry = Value::Object(Map::new());
                    }
                    if let Some(target_sub) = entry.as_object_mut() {
                        apply_changes(base_sub, changed_sub, target_sub);
                    }
                }
                // Created, or base wasn't an object: take ours wholesale.
                _ => {
                    target.insert(key.clone(), value.clone());
                }
            },
            _ => match base.get(key) {
                Some(before) if same(before, value) => {}
                _ => {
                    target.insert(key.clone(), value.clone());
                }
            },
        }
    }

    // Keys present at base time but gone from the changed view were
    // deleted by us.
    for key in base.keys() {
        if !changed.contains_key(key) {
            target.remove(key);
        }
    }
}

/// Deep equality over loosely typed JSON; lists compare as a unit.
fn same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter().all(|(k, lv)| r.get(k).is_some_and(|rv| same(lv, rv)))
        }
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(lv, rv)| same(lv, rv))
        }
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_top_level_keys_survive() {
        let original = json!({"known": 1, "novel": {"server": "only"}});
        let base = json!({"known": 1});
        let changed = json!({"known": 2});

        let merged = putback_json(&original, &base, &changed);
        assert_eq!(merged, json!({"known": 2, "novel": {"server": "only"}}));
    }

    #[test]
    fn every_unknown_key_in_original_is_preserved() {
        // Forward-compat property: any key present in original but
        // absent from base rides through untouched.
        let original = json!({
            "a": 1, "x": "server", "y": [1, 2], "z": {"nested": true}
        });
        let base = json!({"a": 1});
        let changed = json!({"a": 1});

        let merged = putback_json(&original, &base, &changed);
        for key in ["x", "y", "z"] {
            assert_eq!(merged[key], original[key], "lost key {key}");
        }
    }

    #[test]
    fn deleted_keys_are_removed() {
        let original = json!({"keep": 1, "drop": 2});
        let base = json!({"keep": 1, "drop": 2});
        let changed = json!({"keep": 1});

        let merged = putback_json(&original, &base, &changed);
        assert_eq!(merged, json!({"keep": 1}));
    }

    #[test]
    fn nested_objects_merge_recursively() {
        let original = json!({
            "config": {"ours": 1, "theirs": "opaque"},
        });
        let base = json!({"config": {"ours": 1}});
        let changed = json!({"config": {"ours": 5}});

        let merged = putback_json(&original, &base, &changed);
        assert_eq!(
            merged,
            json!({"config": {"ours": 5, "theirs": "opaque"}})
        );
    }

    #[test]
    fn lists_replace_as_units() {
        let original = json!({"list": [1, 2, 3], "tag": "x"});
        let base = json!({"list": [1, 2, 3], "tag": "x"});
        let changed = json!({"list": [1, 2], "tag": "x"});

        let merged = putback_json(&original, &base, &changed);
        assert_eq!(merged["list"], json!([1, 2]));
    }

    #[test]
    fn unchanged_fields_do_not_clobber_server_edits() {
        // The server changed "theirs" since we read; we didn't touch it,
        // so the server's value stands.
        let original = json!({"ours": 1, "shared": "server-edit"});
        let base = json!({"ours": 1, "shared": "as-read"});
        let changed = json!({"ours": 2, "shared": "as-read"});

        let merged = putback_json(&original, &base, &changed);
        assert_eq!(merged["shared"], "server-edit");
        assert_eq!(merged["ours"], 2);
    }

    #[test]
    fn created_nested_objects_appear() {
        let original = json!({});
        let base = json!({});
        let changed = json!({"new": {"a": 1}});

        let merged = putback_json(&original, &base, &changed);
        assert_eq!(merged, json!({"new": {"a": 1}}));
    }
}
