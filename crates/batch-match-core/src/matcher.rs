//! Matching fetched entities back to their originating roots.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::MappingResult;
use crate::hash::canonical_hash;
use crate::mapping::{apply_mapping, MappingContext};
use crate::subset::extract_combinatorial_subsets;

/// Re-associate batched `entities` with their originating `roots`.
///
/// Each entity is bucketed under the canonical hash of every combinatorial
/// key subset it yields — one entity can land in many buckets when the key
/// mapping traverses array fields, which is what duplicate join keys per
/// entity require. Each root then looks up the bucket for its own key,
/// computed by evaluating `key_mapping` against that root alone.
///
/// The output always has the same length and order as `roots`. With
/// `is_list` the per-root value is the bucket's entities in arrival order
/// (an empty list when nothing matched); otherwise it is the first matching
/// entity or `null`. A bucket miss is a legitimate outcome, never an error.
///
/// # Errors
/// Propagates [`crate::MappingError`] from evaluating `key_mapping` against
/// a root.
pub fn map_entities_to_roots(
    entities: &[Value],
    roots: &[Value],
    key_mapping: &Value,
    is_list: bool,
) -> MappingResult<Vec<Value>> {
    let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, entity) in entities.iter().enumerate() {
        for subset in extract_combinatorial_subsets(key_mapping, entity) {
            buckets
                .entry(canonical_hash(&subset))
                .or_default()
                .push(index);
        }
    }

    let mut resolved = Vec::with_capacity(roots.len());
    for root in roots {
        let key = apply_mapping(key_mapping, &MappingContext::Root(root))?;
        let bucket = buckets.get(&canonical_hash(&key)).map_or(&[][..], Vec::as_slice);
        let value = if is_list {
            Value::Array(bucket.iter().map(|&index| entities[index].clone()).collect())
        } else {
            bucket
                .first()
                .map_or(Value::Null, |&index| entities[index].clone())
        };
        resolved.push(value);
    }
    Ok(resolved)
}
