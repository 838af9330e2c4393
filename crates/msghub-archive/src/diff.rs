// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural diff between two message snapshots.
//!
//! Produces `{added, removed}` branches shaped like the input, for patch
//! archive entries. Arrays of id-keyed objects diff by id (reorder is no
//! change), arrays of unique primitives diff as sets, everything else
//! replaces wholesale. Tagged Map records diff per key.

use msghub_core::codec;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// The `{added, removed}` branches of a structural diff. Either side is
/// `None` when nothing was added or removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    /// Values present or changed in the updated snapshot.
    pub added: Option<Value>,
    /// Values present or changed in the existing snapshot.
    pub removed: Option<Value>,
}

impl DiffResult {
    /// Returns `true` when the snapshots are structurally identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.removed.is_none()
    }
}

/// Compute the structural diff from `existing` to `updated`.
#[must_use]
pub fn compute_diff(existing: &Value, updated: &Value) -> DiffResult {
    diff_value(existing, updated)
}

fn diff_value(a: &Value, b: &Value) -> DiffResult {
    if codec::deep_equal(a, b) {
        return DiffResult::default();
    }

    if codec::is_map_value(a) && codec::is_map_value(b) {
        return diff_maps(a, b);
    }

    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => diff_arrays(xs, ys),
        (Value::Object(xs), Value::Object(ys)) => diff_objects(xs, ys),
        _ => DiffResult {
            added: Some(b.clone()),
            removed: Some(a.clone()),
        },
    }
}

fn diff_maps(a: &Value, b: &Value) -> DiffResult {
    let ea = codec::map_entries(a).unwrap_or_default();
    let eb = codec::map_entries(b).unwrap_or_default();
    let left: Vec<(&str, &Value)> = ea.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let right: Vec<(&str, &Value)> = eb.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut added: Vec<(String, Value)> = Vec::new();
    let mut removed: Vec<(String, Value)> = Vec::new();

    for (key, new_value) in &right {
        match left.iter().find(|(k, _)| k == key) {
            Some((_, old_value)) => {
                if !codec::deep_equal(old_value, new_value) {
                    added.push(((*key).to_string(), (*new_value).clone()));
                    removed.push(((*key).to_string(), (*old_value).clone()));
                }
            }
            None => added.push(((*key).to_string(), (*new_value).clone())),
        }
    }
    for (key, old_value) in &left {
        if !right.iter().any(|(k, _)| k == key) {
            removed.push(((*key).to_string(), (*old_value).clone()));
        }
    }

    DiffResult {
        added: (!added.is_empty()).then(|| codec::map_value_from_entries(added)),
        removed: (!removed.is_empty()).then(|| codec::map_value_from_entries(removed)),
    }
}

fn diff_objects(a: &Map<String, Value>, b: &Map<String, Value>) -> DiffResult {
    let mut added = Map::new();
    let mut removed = Map::new();

    for (key, new_value) in b {
        match a.get(key) {
            Some(old_value) => {
                let inner = diff_value(old_value, new_value);
                if let Some(inner_added) = inner.added {
                    added.insert(key.clone(), inner_added);
                }
                if let Some(inner_removed) = inner.removed {
                    removed.insert(key.clone(), inner_removed);
                }
            }
            None => {
                added.insert(key.clone(), new_value.clone());
            }
        }
    }
    for (key, old_value) in a {
        if !b.contains_key(key) {
            removed.insert(key.clone(), old_value.clone());
        }
    }

    DiffResult {
        added: (!added.is_empty()).then(|| Value::Object(added)),
        removed: (!removed.is_empty()).then(|| Value::Object(removed)),
    }
}

fn diff_arrays(xs: &[Value], ys: &[Value]) -> DiffResult {
    if let (Some(left_ids), Some(right_ids)) = (id_index(xs), id_index(ys)) {
        return diff_by_id(xs, ys, &left_ids, &right_ids);
    }
    if unique_primitives(xs) && unique_primitives(ys) {
        return diff_as_set(xs, ys);
    }
    DiffResult {
        added: Some(Value::Array(ys.to_vec())),
        removed: Some(Value::Array(xs.to_vec())),
    }
}

/// The id of every element, when all elements are objects with unique
/// string ids.
fn id_index(items: &[Value]) -> Option<Vec<&str>> {
    let mut ids = Vec::with_capacity(items.len());
    let mut seen = BTreeSet::new();
    for item in items {
        let id = item.as_object()?.get("id")?.as_str()?;
        if !seen.insert(id) {
            return None;
        }
        ids.push(id);
    }
    Some(ids)
}

fn diff_by_id(
    xs: &[Value],
    ys: &[Value],
    left_ids: &[&str],
    right_ids: &[&str],
) -> DiffResult {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for (id, item) in right_ids.iter().zip(ys) {
        match left_ids.iter().position(|l| l == id) {
            Some(pos) => {
                if !codec::deep_equal(&xs[pos], item) {
                    added.push(item.clone());
                    removed.push(xs[pos].clone());
                }
            }
            None => added.push(item.clone()),
        }
    }
    for (id, item) in left_ids.iter().zip(xs) {
        if !right_ids.contains(id) {
            removed.push(item.clone());
        }
    }

    DiffResult {
        added: (!added.is_empty()).then(|| Value::Array(added)),
        removed: (!removed.is_empty()).then(|| Value::Array(removed)),
    }
}

fn unique_primitives(items: &[Value]) -> bool {
    let mut seen = BTreeSet::new();
    items.iter().all(|item| {
        matches!(
            item,
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
        ) && seen.insert(item.to_string())
    })
}

fn diff_as_set(xs: &[Value], ys: &[Value]) -> DiffResult {
    let left: BTreeSet<String> = xs.iter().map(Value::to_string).collect();
    let right: BTreeSet<String> = ys.iter().map(Value::to_string).collect();

    let added: Vec<Value> = ys
        .iter()
        .filter(|item| !left.contains(&item.to_string()))
        .cloned()
        .collect();
    let removed: Vec<Value> = xs
        .iter()
        .filter(|item| !right.contains(&item.to_string()))
        .cloned()
        .collect();

    DiffResult {
        added: (!added.is_empty()).then(|| Value::Array(added)),
        removed: (!removed.is_empty()).then(|| Value::Array(removed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_values_produce_no_diff() {
        let value = json!({"a": 1, "b": [1, 2]});
        assert!(compute_diff(&value, &value).is_empty());
    }

    #[test]
    fn scalar_change_is_wholesale() {
        let diff = compute_diff(&json!({"a": 1}), &json!({"a": 2}));
        assert_eq!(diff.added, Some(json!({"a": 2})));
        assert_eq!(diff.removed, Some(json!({"a": 1})));
    }

    #[test]
    fn object_diff_only_carries_changed_keys() {
        let diff = compute_diff(
            &json!({"keep": 1, "change": "old", "drop": true}),
            &json!({"keep": 1, "change": "new", "grow": 7}),
        );
        assert_eq!(diff.added, Some(json!({"change": "new", "grow": 7})));
        assert_eq!(diff.removed, Some(json!({"change": "old", "drop": true})));
    }

    #[test]
    fn id_keyed_reorder_is_no_diff() {
        let a = json!([{"id": "a", "name": "A"}, {"id": "b", "name": "B"}]);
        let b = json!([{"id": "b", "name": "B"}, {"id": "a", "name": "A"}]);
        assert!(compute_diff(&a, &b).is_empty());
    }

    #[test]
    fn id_keyed_change_appears_on_both_sides() {
        let a = json!([{"id": "a", "checked": false}]);
        let b = json!([{"id": "a", "checked": true}]);
        let diff = compute_diff(&a, &b);
        assert_eq!(diff.added, Some(json!([{"id": "a", "checked": true}])));
        assert_eq!(diff.removed, Some(json!([{"id": "a", "checked": false}])));
    }

    #[test]
    fn id_keyed_add_and_remove() {
        let a = json!([{"id": "a"}, {"id": "b"}]);
        let b = json!([{"id": "b"}, {"id": "c"}]);
        let diff = compute_diff(&a, &b);
        assert_eq!(diff.added, Some(json!([{"id": "c"}])));
        assert_eq!(diff.removed, Some(json!([{"id": "a"}])));
    }

    #[test]
    fn primitive_sets_ignore_reorder() {
        assert!(compute_diff(&json!(["x", "y"]), &json!(["y", "x"])).is_empty());
        let diff = compute_diff(&json!(["x", "y"]), &json!(["y", "z"]));
        assert_eq!(diff.added, Some(json!(["z"])));
        assert_eq!(diff.removed, Some(json!(["x"])));
    }

    #[test]
    fn mixed_arrays_replace_wholesale() {
        let a = json!([1, 1, 2]);
        let b = json!([1, 2]);
        let diff = compute_diff(&a, &b);
        assert_eq!(diff.added, Some(json!([1, 2])));
        assert_eq!(diff.removed, Some(json!([1, 1, 2])));
    }

    #[test]
    fn tagged_maps_diff_per_key() {
        let a = msghub_core::codec::map_value_from_entries(vec![
            ("keep".to_string(), json!(1)),
            ("old".to_string(), json!(2)),
        ]);
        let b = msghub_core::codec::map_value_from_entries(vec![
            ("keep".to_string(), json!(1)),
            ("new".to_string(), json!(3)),
        ]);
        let diff = compute_diff(&a, &b);
        let added = diff.added.unwrap();
        assert!(msghub_core::codec::is_map_value(&added));
        let entries = msghub_core::codec::map_entries(&added).unwrap();
        assert_eq!(entries, vec![("new".to_string(), json!(3))]);
        let removed_entries =
            msghub_core::codec::map_entries(&diff.removed.unwrap()).unwrap();
        assert_eq!(removed_entries, vec![("old".to_string(), json!(2))]);
    }

    #[test]
    fn nested_structures_diff_recursively() {
        let a = json!({"timing": {"dueAt": 1, "createdAt": 5}});
        let b = json!({"timing": {"dueAt": 2, "createdAt": 5}});
        let diff = compute_diff(&a, &b);
        assert_eq!(diff.added, Some(json!({"timing": {"dueAt": 2}})));
        assert_eq!(diff.removed, Some(json!({"timing": {"dueAt": 1}})));
    }
}
