//! Combinatorial subset extraction.
//!
//! A key mapping's leaf paths name the entity fields that identify a join
//! key. [`extract_subset`] prunes an entity down to those branches;
//! [`extract_combinatorial_subsets`] then expands every array-valued branch
//! into one fully-scalarized subset object per combination, which is what
//! makes duplicate join keys per entity work for one-to-many and
//! many-to-many mappings.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Structural leaf paths of a mapping, ignoring array positions.
pub(crate) fn leaf_paths(mapping: &Value) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    collect_leaf_paths(mapping, &mut Vec::new(), &mut paths);
    paths
}

fn collect_leaf_paths(node: &Value, path: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    match node {
        Value::Object(entries) if !entries.is_empty() => {
            for (key, child) in entries {
                path.push(key.clone());
                collect_leaf_paths(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for item in items {
                collect_leaf_paths(item, path, out);
            }
        }
        _ => out.push(path.clone()),
    }
}

/// Prune `obj` to the branches whose field path is a prefix of, or extends,
/// some leaf path of `mapping`. Array structure and ordering are preserved;
/// everything else is dropped. A `null` mapping yields `null`.
#[must_use]
pub fn extract_subset(mapping: &Value, obj: &Value) -> Value {
    if mapping.is_null() {
        return Value::Null;
    }
    let leaves = leaf_paths(mapping);
    prune(obj, &mut Vec::new(), &leaves).unwrap_or(Value::Null)
}

fn prune(node: &Value, path: &mut Vec<String>, leaves: &[Vec<String>]) -> Option<Value> {
    let extends_leaf = leaves
        .iter()
        .any(|leaf| leaf.len() <= path.len() && path[..leaf.len()] == leaf[..]);
    if extends_leaf {
        return Some(node.clone());
    }
    let prefix_of_leaf = leaves
        .iter()
        .any(|leaf| path.len() <= leaf.len() && leaf[..path.len()] == path[..]);
    if !prefix_of_leaf {
        return None;
    }

    match node {
        Value::Object(entries) => {
            let mut out = Map::new();
            for (key, child) in entries {
                path.push(key.clone());
                if let Some(kept) = prune(child, path, leaves) {
                    out.insert(key.clone(), kept);
                }
                path.pop();
            }
            Some(Value::Object(out))
        }
        // Array positions are transparent: every element sits at the same
        // field path as the array itself.
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| prune(item, path, leaves))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

/// Expand `mapping` against `obj` into every possible scalarized key
/// combination.
///
/// At each position of the pruned subset: arrays expand each element and
/// flatten one level; declared leaf paths and true leaf values contribute a
/// single possibility; objects take the Cartesian product across their
/// children's possibilities, emitting one object per combination in source
/// key order. A `null` mapping yields an empty sequence. A mapping leaf over
/// a missing field contributes an object without that key, distinct from a
/// field that is present with a `null` value.
#[must_use]
pub fn extract_combinatorial_subsets(mapping: &Value, obj: &Value) -> Vec<Value> {
    if mapping.is_null() {
        return Vec::new();
    }
    let leaves: HashSet<Vec<String>> = leaf_paths(mapping).into_iter().collect();
    let subset = extract_subset(mapping, obj);
    expand(&subset, &mut Vec::new(), &leaves)
}

fn expand(node: &Value, path: &mut Vec<String>, leaves: &HashSet<Vec<String>>) -> Vec<Value> {
    match node {
        Value::Array(items) => items
            .iter()
            .flat_map(|item| expand(item, path, leaves))
            .collect(),
        Value::Object(entries) if !leaves.contains(path.as_slice()) => {
            let mut combos: Vec<Map<String, Value>> = vec![Map::new()];
            for (key, child) in entries {
                path.push(key.clone());
                let options = expand(child, path, leaves);
                path.pop();
                let mut next = Vec::with_capacity(combos.len() * options.len());
                for combo in &combos {
                    for option in &options {
                        let mut extended = combo.clone();
                        extended.insert(key.clone(), option.clone());
                        next.push(extended);
                    }
                }
                combos = next;
            }
            combos.into_iter().map(Value::Object).collect()
        }
        other => vec![other.clone()],
    }
}
