//! Declarative mapping evaluation.
//!
//! A mapping spec is an arbitrary JSON value. Objects and ordered sequences
//! recurse structurally and keep their key/element order; string leaves that
//! are path expressions resolve against the context; every other leaf is a
//! literal constant that passes through unchanged. Evaluation is pure: the
//! output is a fresh structure mirroring the spec's shape.

use serde_json::{Map, Value};

use crate::error::MappingResult;
use crate::expr::TransformExpr;
use crate::path::{is_path_expression, parse_path, Resolved};

/// The context a mapping is evaluated against: one root for per-root key
/// computation, or the whole ordered batch for building fetch arguments.
#[derive(Debug, Clone, Copy)]
pub enum MappingContext<'a> {
    Root(&'a Value),
    Roots(&'a [Value]),
}

/// Evaluate `spec` against `ctx`.
///
/// A path expression over `root.` that resolves to nothing is absence: the
/// surrounding object omits that key (a `null` field value stays `null`, so
/// the two remain distinguishable). Inside an ordered sequence, absence
/// becomes `null` so element positions are preserved.
///
/// # Errors
/// [`crate::MappingError::Path`] for malformed path-expression syntax,
/// [`crate::MappingError::Expression`] when a transform fails to parse or
/// evaluate. Missing fields are not errors.
pub fn apply_mapping(spec: &Value, ctx: &MappingContext<'_>) -> MappingResult<Value> {
    Ok(eval_node(spec, ctx)?.unwrap_or(Value::Null))
}

/// Parse every path expression and transform in `spec` without evaluating
/// anything, so malformed mappings fail fast at compile time instead of on
/// the first request.
///
/// # Errors
/// The first [`crate::MappingError::Path`] or
/// [`crate::MappingError::Expression`] encountered.
pub fn validate_mapping(spec: &Value) -> MappingResult<()> {
    match spec {
        Value::Object(entries) => entries.values().try_for_each(validate_mapping),
        Value::Array(items) => items.iter().try_for_each(validate_mapping),
        Value::String(text) if is_path_expression(text) => {
            let (path_part, transform_part) = match text.split_once(" | ") {
                Some((path, transform)) => (path, Some(transform)),
                None => (text.as_str(), None),
            };
            parse_path(path_part)?;
            if let Some(transform) = transform_part {
                TransformExpr::parse(transform)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn eval_node(node: &Value, ctx: &MappingContext<'_>) -> MappingResult<Option<Value>> {
    match node {
        Value::Object(entries) => {
            let mut out = Map::new();
            for (key, child) in entries {
                if let Some(evaluated) = eval_node(child, ctx)? {
                    out.insert(key.clone(), evaluated);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_node(item, ctx)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(out)))
        }
        Value::String(text) if is_path_expression(text) => eval_leaf(text, ctx),
        other => Ok(Some(other.clone())),
    }
}

fn eval_leaf(text: &str, ctx: &MappingContext<'_>) -> MappingResult<Option<Value>> {
    let (path_part, transform_part) = match text.split_once(" | ") {
        Some((path, transform)) => (path, Some(transform)),
        None => (text, None),
    };

    let path = parse_path(path_part)?;
    let transform = transform_part.map(TransformExpr::parse).transpose()?;

    match path.resolve(ctx) {
        Resolved::Many(items) => {
            let items = match &transform {
                Some(transform) => items
                    .iter()
                    .map(|item| transform.apply(item))
                    .collect::<MappingResult<Vec<_>>>()?,
                None => items,
            };
            Ok(Some(Value::Array(items)))
        }
        Resolved::One(Some(value)) => {
            let value = match &transform {
                Some(transform) => transform.apply(&value)?,
                None => value,
            };
            Ok(Some(value))
        }
        Resolved::One(None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::MappingError;

    fn fixture_roots() -> Vec<Value> {
        vec![
            json!({ "id": 1, "name": "Alice", "friends": ["Bob", "Chris"] }),
            json!({ "id": 2, "name": "Bob", "friends": ["Chris", "Debbie"] }),
        ]
    }

    fn apply_batch(spec: &Value, roots: &[Value]) -> Value {
        match apply_mapping(spec, &MappingContext::Roots(roots)) {
            Ok(value) => value,
            Err(err) => panic!("mapping failed: {err}"),
        }
    }

    fn apply_single(spec: &Value, root: &Value) -> Value {
        match apply_mapping(spec, &MappingContext::Root(root)) {
            Ok(value) => value,
            Err(err) => panic!("mapping failed: {err}"),
        }
    }

    #[test]
    fn null_spec_yields_null_and_empty_spec_yields_empty() {
        let roots = fixture_roots();
        assert_eq!(apply_batch(&Value::Null, &roots), Value::Null);
        assert_eq!(apply_batch(&json!({}), &roots), json!({}));
    }

    #[test]
    fn maps_top_level_fields() {
        let roots = fixture_roots();
        let spec = json!({ "idsIn": "roots[*].id", "namesIn": "roots[*].name" });
        assert_eq!(
            apply_batch(&spec, &roots),
            json!({ "idsIn": [1, 2], "namesIn": ["Alice", "Bob"] })
        );
    }

    #[test]
    fn maps_nested_fields() {
        let roots = fixture_roots();
        let spec = json!({
            "ids": { "in": "roots[*].id" },
            "names": { "in": "roots[*].name" },
        });
        assert_eq!(
            apply_batch(&spec, &roots),
            json!({ "ids": { "in": [1, 2] }, "names": { "in": ["Alice", "Bob"] } })
        );
    }

    #[test]
    fn preserves_sequence_order() {
        let roots = fixture_roots();
        let spec = json!({ "in": [{ "ids": "roots[*].id" }, { "names": "roots[*].name" }] });
        assert_eq!(
            apply_batch(&spec, &roots),
            json!({ "in": [{ "ids": [1, 2] }, { "names": ["Alice", "Bob"] }] })
        );
    }

    #[test]
    fn passes_literal_constants_through() {
        let roots = fixture_roots();
        let spec = json!({
            "isFemale": true,
            "ageOver": 21,
            "nameStartsWith": "A",
            "profession": "Doctor",
        });
        assert_eq!(apply_batch(&spec, &roots), spec);
    }

    #[test]
    fn handles_dollar_prefix_and_wildcard_flattening() {
        let roots = fixture_roots();
        let spec = json!({
            "idsIn": "roots[*].id",
            "namesIn": "$.roots[*].name",
            "friendsIn": "roots[*].friends[*]",
        });
        assert_eq!(
            apply_batch(&spec, &roots),
            json!({
                "idsIn": [1, 2],
                "namesIn": ["Alice", "Bob"],
                "friendsIn": ["Bob", "Chris", "Chris", "Debbie"],
            })
        );
    }

    #[test]
    fn resolves_against_a_single_root() {
        let roots = fixture_roots();
        let spec = json!({
            "id": "root.id",
            "name": "$.root.name",
            "friends": "root.friends[*]",
        });
        assert_eq!(
            apply_single(&spec, &roots[0]),
            json!({ "id": 1, "name": "Alice", "friends": ["Bob", "Chris"] })
        );
    }

    #[test]
    fn does_not_wrap_scalars_in_lists() {
        let roots = fixture_roots();
        assert_eq!(
            apply_single(&json!({ "firstName": "root.name" }), &roots[0]),
            json!({ "firstName": "Alice" })
        );
    }

    #[test]
    fn keeps_singleton_lists_as_lists() {
        let roots = vec![json!({ "name": "Alice" })];
        assert_eq!(
            apply_batch(&json!({ "namesIn": "roots[*].name" }), &roots),
            json!({ "namesIn": ["Alice"] })
        );
    }

    #[test]
    fn applies_transforms_to_scalars_and_per_element() {
        let root = json!({ "test": 10 });
        assert_eq!(
            apply_single(&json!({ "result": "root.test | $ + 5" }), &root),
            json!({ "result": 15 })
        );

        let root = json!({ "test": [1, 2, 3] });
        assert_eq!(
            apply_single(&json!({ "result": "root.test[*] | $ + 5" }), &root),
            json!({ "result": [6, 7, 8] })
        );
    }

    #[test]
    fn missing_fields_resolve_to_absence() {
        let root = json!({ "id": 1 });
        assert_eq!(apply_single(&json!({ "age": "root.age" }), &root), json!({}));

        let root_with_null = json!({ "age": null });
        assert_eq!(
            apply_single(&json!({ "age": "root.age" }), &root_with_null),
            json!({ "age": null })
        );
    }

    #[test]
    fn surfaces_path_and_expression_errors() {
        let root = json!({ "id": 1 });
        match apply_mapping(&json!({ "id": "root.id[" }), &MappingContext::Root(&root)) {
            Err(MappingError::Path { .. }) => {}
            other => panic!("expected path error, got {other:?}"),
        }
        match apply_mapping(
            &json!({ "id": "root.id | frobnicate($)" }),
            &MappingContext::Root(&root),
        ) {
            Err(MappingError::Expression { .. }) => {}
            other => panic!("expected expression error, got {other:?}"),
        }
    }
}
