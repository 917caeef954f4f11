//! Configuration documents: merge-patch and structural diff
//!
//! Every resource owns one JSON document (an ordered tree of maps,
//! sequences and scalars). Partial updates are applied with RFC 7386
//! merge-patch semantics; full replacements are reduced to an ordered op
//! list by [`diff`] and replayed with [`apply_ops`] so that sequence
//! removals (which merge-patch cannot express) behave correctly.
//!
//! Diff over sequences is positional: an index present in `old` but
//! absent in `new` is a removal of that position, and reordering the same
//! entries is observed as N replacements. Resources whose entries carry
//! stable ids (overlays, privacy masks) do their own identity-based
//! delete detection on top of this.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One structural difference between two documents.
///
/// `path` is a JSON pointer into the *new* document (or into the old one
/// for removals).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl DiffOp {
    pub fn path(&self) -> &str {
        match self {
            DiffOp::Add { path, .. } | DiffOp::Remove { path } | DiffOp::Replace { path, .. } => {
                path
            }
        }
    }
}

/// Recursively overlay `patch` onto `base` (RFC 7386 merge-patch).
///
/// Maps merge key-wise, `null` removes a key, any non-map value replaces
/// the base value wholesale.
pub fn merge_patch(base: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !base.is_object() {
                *base = Value::Object(Map::new());
            }
            if let Value::Object(base_map) = base {
                for (key, patch_value) in patch_map {
                    if patch_value.is_null() {
                        base_map.remove(key);
                    } else {
                        let slot = base_map.entry(key.clone()).or_insert(Value::Null);
                        merge_patch(slot, patch_value);
                    }
                }
            }
        }
        other => *base = other.clone(),
    }
}

/// Compute the ordered op list turning `old` into `new`.
pub fn diff(old: &Value, new: &Value) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    diff_at(old, new, "", &mut ops);
    ops
}

fn diff_at(old: &Value, new: &Value, path: &str, ops: &mut Vec<DiffOp>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = join(path, key);
                match new_map.get(key) {
                    Some(new_value) => diff_at(old_value, new_value, &child, ops),
                    None => ops.push(DiffOp::Remove { path: child }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    ops.push(DiffOp::Add {
                        path: join(path, key),
                        value: new_value.clone(),
                    });
                }
            }
        }
        (Value::Array(old_arr), Value::Array(new_arr)) => {
            let common = old_arr.len().min(new_arr.len());
            for i in 0..common {
                diff_at(&old_arr[i], &new_arr[i], &format!("{path}/{i}"), ops);
            }
            // Trailing removals are emitted highest index first so that
            // replaying the ops in order keeps earlier indices valid.
            for i in (common..old_arr.len()).rev() {
                ops.push(DiffOp::Remove {
                    path: format!("{path}/{i}"),
                });
            }
            for i in common..new_arr.len() {
                ops.push(DiffOp::Add {
                    path: format!("{path}/{i}"),
                    value: new_arr[i].clone(),
                });
            }
        }
        (old_value, new_value) => {
            if old_value != new_value {
                ops.push(DiffOp::Replace {
                    path: path.to_string(),
                    value: new_value.clone(),
                });
            }
        }
    }
}

/// Replay an op list produced by [`diff`] onto `doc`.
pub fn apply_ops(doc: &mut Value, ops: &[DiffOp]) -> Result<()> {
    for op in ops {
        apply_op(doc, op)?;
    }
    Ok(())
}

fn apply_op(doc: &mut Value, op: &DiffOp) -> Result<()> {
    let path = op.path();
    if path.is_empty() {
        match op {
            DiffOp::Add { value, .. } | DiffOp::Replace { value, .. } => {
                *doc = value.clone();
                return Ok(());
            }
            DiffOp::Remove { .. } => {
                return Err(Error::invalid("cannot remove document root"));
            }
        }
    }

    let (parent_path, token) = path
        .rsplit_once('/')
        .ok_or_else(|| Error::invalid(format!("malformed pointer '{path}'")))?;
    let key = unescape(token);
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| Error::invalid(format!("no such path '{parent_path}'")))?;

    match (parent, op) {
        (Value::Object(map), DiffOp::Add { value, .. })
        | (Value::Object(map), DiffOp::Replace { value, .. }) => {
            map.insert(key, value.clone());
        }
        (Value::Object(map), DiffOp::Remove { .. }) => {
            map.remove(&key)
                .ok_or_else(|| Error::invalid(format!("no such key '{path}'")))?;
        }
        (Value::Array(arr), op) => {
            let index: usize = key
                .parse()
                .map_err(|_| Error::invalid(format!("bad sequence index '{path}'")))?;
            match op {
                DiffOp::Add { value, .. } => {
                    if index > arr.len() {
                        return Err(Error::invalid(format!("index out of range '{path}'")));
                    }
                    arr.insert(index, value.clone());
                }
                DiffOp::Replace { value, .. } => {
                    *arr.get_mut(index)
                        .ok_or_else(|| Error::invalid(format!("index out of range '{path}'")))? =
                        value.clone();
                }
                DiffOp::Remove { .. } => {
                    if index >= arr.len() {
                        return Err(Error::invalid(format!("index out of range '{path}'")));
                    }
                    arr.remove(index);
                }
            }
        }
        _ => {
            return Err(Error::invalid(format!(
                "parent of '{path}' is not a container"
            )));
        }
    }
    Ok(())
}

fn join(path: &str, key: &str) -> String {
    format!("{path}/{}", escape(key))
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_overlays_maps_keywise() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        merge_patch(&mut base, &json!({"a": {"y": 20, "z": 30}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 20, "z": 30}, "b": 3}));
    }

    #[test]
    fn merge_patch_null_removes_key() {
        let mut base = json!({"a": 1, "b": 2});
        merge_patch(&mut base, &json!({"a": null}));
        assert_eq!(base, json!({"b": 2}));
    }

    #[test]
    fn merge_patch_replaces_non_map_values() {
        let mut base = json!({"list": [1, 2, 3]});
        merge_patch(&mut base, &json!({"list": [9]}));
        assert_eq!(base, json!({"list": [9]}));
    }

    #[test]
    fn diff_is_inverse_of_patch_for_changed_paths() {
        let original = json!({"rotation": {"enabled": false, "angle": "ROTATION_ANGLE_0"}});
        let mut patched = original.clone();
        merge_patch(&mut patched, &json!({"rotation": {"enabled": true}}));

        let ops = diff(&original, &patched);
        assert_eq!(
            ops,
            vec![DiffOp::Replace {
                path: "/rotation/enabled".into(),
                value: json!(true),
            }]
        );
    }

    #[test]
    fn diff_self_is_empty() {
        let doc = json!({"a": [1, {"b": 2}], "c": "x"});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn positional_removal_is_index_based() {
        let old = json!([{"id": "A"}, {"id": "B"}, {"id": "C"}]);
        let new = json!([{"id": "A"}, {"id": "C"}]);
        let ops = diff(&old, &new);
        // Position 1 is replaced (B -> C) and position 2 removed; positional
        // diff does not match entries by id.
        assert_eq!(
            ops,
            vec![
                DiffOp::Replace {
                    path: "/1/id".into(),
                    value: json!("C"),
                },
                DiffOp::Remove { path: "/2".into() },
            ]
        );
    }

    #[test]
    fn reorder_observed_as_replacements() {
        let old = json!(["a", "b"]);
        let new = json!(["b", "a"]);
        let ops = diff(&old, &new);
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| matches!(op, DiffOp::Replace { .. })));
    }

    #[test]
    fn apply_ops_replays_diff() {
        let old = json!({"streams": [{"w": 1920}, {"w": 1280}, {"w": 640}], "extra": 1});
        let new = json!({"streams": [{"w": 1920, "h": 1080}], "name": "main"});
        let ops = diff(&old, &new);
        let mut replayed = old.clone();
        apply_ops(&mut replayed, &ops).unwrap();
        assert_eq!(replayed, new);
    }

    #[test]
    fn apply_ops_rejects_unknown_path() {
        let mut doc = json!({"a": 1});
        let err = apply_op(
            &mut doc,
            &DiffOp::Remove {
                path: "/missing/b".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }

    #[test]
    fn escaped_keys_round_trip() {
        let old = json!({"a/b": 1});
        let new = json!({"a/b": 2});
        let ops = diff(&old, &new);
        assert_eq!(ops[0].path(), "/a~1b");
        let mut replayed = old.clone();
        apply_ops(&mut replayed, &ops).unwrap();
        assert_eq!(replayed, new);
    }
}
