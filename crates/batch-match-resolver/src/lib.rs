//! batch-match-resolver: the config surface over `batch-match-core`.
//!
//! An external config loader supplies a two-level map
//! `{ parentTypeName: { fieldName: ResolverConfig } }`. Each field config is
//! compiled once into a [`BatchResolver`]: its mappings are validated up
//! front, the parent-side selection set is derived, and the entity-side key
//! fields are recorded for splicing into the batched query. At request time
//! the surrounding delegator collects the complete roots batch, derives the
//! target field's cardinality, and hands both to [`BatchResolver::resolve`]
//! together with the batched fetch function. This crate performs no I/O of
//! its own; fetch errors propagate unchanged, with no retry or backoff.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use batch_match_core::{
    apply_mapping, key_field_paths, map_entities_to_roots, validate_mapping, MappingContext,
    SelectionSet,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// The delegator's batched fetch: one call per batch window, taking the
/// evaluated arguments object and returning the fetched entities.
pub type BatchFetchFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Vec<Value>>> + Send>> + Send + Sync>;

/// Per-field resolver configuration, as loaded from config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Name of the batched downstream query to delegate to.
    pub query_name: String,
    /// Builds the batched fetch arguments from the whole roots batch.
    pub args_mapping: Value,
    /// Derives the join key from a root or an entity. When absent, fetched
    /// entities pass through unmatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_mapping: Option<Value>,
}

/// A compiled per-field resolver descriptor.
#[derive(Debug, Clone)]
pub struct BatchResolver {
    config: ResolverConfig,
    selection_set: SelectionSet,
    key_fields: Vec<Vec<String>>,
}

impl BatchResolver {
    /// Compile a field config, validating every path expression and
    /// transform so malformed mappings are rejected here rather than on the
    /// first request.
    pub fn compile(config: ResolverConfig) -> Result<Self> {
        validate_mapping(&config.args_mapping).with_context(|| {
            format!("invalid argsMapping for query `{}`", config.query_name)
        })?;
        let mut selection_specs = Vec::new();
        let mut key_fields = Vec::new();
        if let Some(key_mapping) = &config.key_mapping {
            validate_mapping(key_mapping).with_context(|| {
                format!("invalid keyMapping for query `{}`", config.query_name)
            })?;
            selection_specs.push(key_mapping);
            key_fields = key_field_paths(key_mapping);
        }
        selection_specs.push(&config.args_mapping);

        let selection_set = SelectionSet::from_mappings(&selection_specs)
            .with_context(|| format!("invalid mapping for query `{}`", config.query_name))?;
        debug!(
            query = %config.query_name,
            selection = %selection_set.render(),
            "compiled batch resolver"
        );

        Ok(Self { config, selection_set, key_fields })
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Parent-side fields this resolver needs available on every root.
    #[must_use]
    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    /// Entity-side fields the batched query must return so join keys can be
    /// recomputed.
    #[must_use]
    pub fn key_fields(&self) -> &[Vec<String>] {
        &self.key_fields
    }

    /// Splice the key fields into an existing selection for the batched
    /// query, reusing nodes the caller already requested.
    pub fn splice_selection(&self, existing: &mut SelectionSet) {
        existing.ensure_paths(&self.key_fields);
    }

    /// Resolve a complete batch: build the fetch arguments from all roots,
    /// invoke the fetch exactly once, and match the entities back per root.
    ///
    /// `is_list` is the target field's cardinality as derived by the
    /// delegator from the downstream field's declared type. Without a key
    /// mapping the fetched entities pass through in arrival order.
    ///
    /// # Errors
    /// Mapping evaluation failures, wrapped with query context; fetch errors
    /// propagate unchanged.
    pub async fn resolve(
        &self,
        roots: &[Value],
        is_list: bool,
        fetch: &BatchFetchFn,
    ) -> Result<Vec<Value>> {
        let args = apply_mapping(&self.config.args_mapping, &MappingContext::Roots(roots))
            .with_context(|| {
                format!("failed to build arguments for query `{}`", self.config.query_name)
            })?;
        debug!(
            query = %self.config.query_name,
            roots = roots.len(),
            "executing batched fetch"
        );
        let entities = fetch(args).await?;
        debug!(
            query = %self.config.query_name,
            entities = entities.len(),
            "matching fetched entities"
        );

        match &self.config.key_mapping {
            Some(key_mapping) => map_entities_to_roots(&entities, roots, key_mapping, is_list)
                .with_context(|| {
                    format!("failed to match entities for query `{}`", self.config.query_name)
                }),
            None => Ok(entities),
        }
    }
}

/// Compiled resolvers keyed by parent type name, then field name.
pub type ResolverMap = BTreeMap<String, BTreeMap<String, BatchResolver>>;

/// Compile a two-level `{ parentTypeName: { fieldName: config } }` map.
///
/// # Errors
/// The first compilation failure, annotated with the owning type and field.
pub fn compile_resolver_map(
    configs: BTreeMap<String, BTreeMap<String, ResolverConfig>>,
) -> Result<ResolverMap> {
    let mut compiled = ResolverMap::new();
    for (type_name, fields) in configs {
        let mut compiled_fields = BTreeMap::new();
        for (field_name, config) in fields {
            let resolver = BatchResolver::compile(config)
                .with_context(|| format!("failed to compile resolver {type_name}.{field_name}"))?;
            compiled_fields.insert(field_name, resolver);
        }
        compiled.insert(type_name, compiled_fields);
    }
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn author_config() -> ResolverConfig {
        ResolverConfig {
            query_name: "author".to_string(),
            args_mapping: json!({ "idsIn": "roots[*].authorId" }),
            key_mapping: Some(json!({ "id": "root.authorId" })),
        }
    }

    fn compile(config: ResolverConfig) -> BatchResolver {
        match BatchResolver::compile(config) {
            Ok(resolver) => resolver,
            Err(err) => panic!("compile failed: {err:#}"),
        }
    }

    /// Fetch stub that records its calls and received arguments.
    fn recording_fetch(
        entities: Vec<Value>,
        calls: Arc<AtomicUsize>,
        seen_args: Arc<Mutex<Vec<Value>>>,
    ) -> BatchFetchFn {
        Arc::new(move |args: Value| {
            let entities = entities.clone();
            let calls = Arc::clone(&calls);
            let seen_args = Arc::clone(&seen_args);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut seen) = seen_args.lock() {
                    seen.push(args);
                }
                Ok(entities)
            })
        })
    }

    #[test]
    fn compile_derives_the_parent_selection_set() {
        let resolver = compile(author_config());
        assert_eq!(resolver.selection_set().render(), "{authorId}");
        assert_eq!(resolver.key_fields(), &[vec!["id".to_string()]]);
    }

    #[test]
    fn compile_rejects_malformed_mappings() {
        let bad = ResolverConfig {
            query_name: "author".to_string(),
            args_mapping: json!({ "idsIn": "roots[*].id[" }),
            key_mapping: None,
        };
        let err = match BatchResolver::compile(bad) {
            Ok(_) => panic!("expected compile failure"),
            Err(err) => format!("{err:#}"),
        };
        assert!(err.contains("argsMapping"), "unexpected error: {err}");

        let bad_transform = ResolverConfig {
            query_name: "author".to_string(),
            args_mapping: json!({ "idsIn": "roots[*].id | launch($)" }),
            key_mapping: None,
        };
        assert!(BatchResolver::compile(bad_transform).is_err());
    }

    #[test]
    fn splices_key_fields_into_an_existing_selection() {
        let resolver = compile(author_config());
        let mut existing = match SelectionSet::parse("{name age}") {
            Ok(selection) => selection,
            Err(err) => panic!("selection parse failed: {err}"),
        };
        resolver.splice_selection(&mut existing);
        assert_eq!(existing.render(), "{name age id}");
    }

    #[tokio::test]
    async fn resolves_a_batch_with_one_fetch() {
        let roots = vec![
            json!({ "title": "First", "authorId": 1 }),
            json!({ "title": "Second", "authorId": 2 }),
            json!({ "title": "Third", "authorId": 9 }),
        ];
        let authors = vec![
            json!({ "id": 2, "name": "Bob" }),
            json!({ "id": 1, "name": "Alice" }),
        ];
        let calls = Arc::new(AtomicUsize::new(0));
        let seen_args = Arc::new(Mutex::new(Vec::new()));
        let fetch = recording_fetch(authors.clone(), Arc::clone(&calls), Arc::clone(&seen_args));

        let resolver = compile(author_config());
        let resolved = match resolver.resolve(&roots, false, &fetch).await {
            Ok(resolved) => resolved,
            Err(err) => panic!("resolve failed: {err:#}"),
        };

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let seen = match seen_args.lock() {
            Ok(seen) => seen.clone(),
            Err(err) => panic!("lock poisoned: {err}"),
        };
        assert_eq!(seen, vec![json!({ "idsIn": [1, 2, 9] })]);
        assert_eq!(resolved, vec![authors[1].clone(), authors[0].clone(), Value::Null]);
    }

    #[tokio::test]
    async fn resolves_list_cardinality() {
        let roots = vec![json!({ "id": "A" }), json!({ "id": "B" })];
        let professors = vec![
            json!({ "id": 3, "schoolId": "A" }),
            json!({ "id": 2, "schoolId": "A" }),
            json!({ "id": 1, "schoolId": "B" }),
        ];
        let fetch = recording_fetch(
            professors.clone(),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Mutex::new(Vec::new())),
        );

        let resolver = compile(ResolverConfig {
            query_name: "professors".to_string(),
            args_mapping: json!({ "schoolIdsIn": "roots[*].id" }),
            key_mapping: Some(json!({ "schoolId": "root.id" })),
        });
        let resolved = match resolver.resolve(&roots, true, &fetch).await {
            Ok(resolved) => resolved,
            Err(err) => panic!("resolve failed: {err:#}"),
        };
        assert_eq!(
            resolved,
            vec![json!([professors[0], professors[1]]), json!([professors[2]])]
        );
    }

    #[tokio::test]
    async fn passes_entities_through_without_a_key_mapping() {
        let roots = vec![json!({ "id": 1 })];
        let entities = vec![json!({ "id": 7 }), json!({ "id": 8 })];
        let fetch = recording_fetch(
            entities.clone(),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Mutex::new(Vec::new())),
        );

        let resolver = compile(ResolverConfig {
            query_name: "things".to_string(),
            args_mapping: json!({ "idsIn": "roots[*].id" }),
            key_mapping: None,
        });
        let resolved = match resolver.resolve(&roots, true, &fetch).await {
            Ok(resolved) => resolved,
            Err(err) => panic!("resolve failed: {err:#}"),
        };
        assert_eq!(resolved, entities);
    }

    #[tokio::test]
    async fn propagates_fetch_errors_unchanged() {
        let fetch: BatchFetchFn = Arc::new(|_args| {
            Box::pin(async { Err(anyhow::anyhow!("downstream unavailable")) })
        });
        let resolver = compile(author_config());
        let err = match resolver.resolve(&[json!({ "authorId": 1 })], false, &fetch).await {
            Ok(_) => panic!("expected fetch error"),
            Err(err) => format!("{err:#}"),
        };
        assert!(err.contains("downstream unavailable"), "unexpected error: {err}");
    }

    #[test]
    fn compiles_a_two_level_config_map() {
        let mut book_fields = BTreeMap::new();
        book_fields.insert("author".to_string(), author_config());
        let mut author_fields = BTreeMap::new();
        author_fields.insert(
            "address".to_string(),
            ResolverConfig {
                query_name: "addresses".to_string(),
                args_mapping: json!({ "idsIn": "roots[*].addressId" }),
                key_mapping: Some(json!({ "id": "root.addressId" })),
            },
        );
        let mut configs = BTreeMap::new();
        configs.insert("Book".to_string(), book_fields);
        configs.insert("Author".to_string(), author_fields);

        let compiled = match compile_resolver_map(configs) {
            Ok(compiled) => compiled,
            Err(err) => panic!("compile failed: {err:#}"),
        };
        assert_eq!(compiled.len(), 2);
        let author = &compiled["Book"]["author"];
        assert_eq!(author.selection_set().render(), "{authorId}");
        let address = &compiled["Author"]["address"];
        assert_eq!(address.config().query_name, "addresses");
    }

    #[test]
    fn config_deserializes_from_camel_case() {
        let raw = json!({
            "queryName": "author",
            "argsMapping": { "idsIn": "roots[*].authorId" },
            "keyMapping": { "id": "root.authorId" },
        });
        let config: ResolverConfig = match serde_json::from_value(raw) {
            Ok(config) => config,
            Err(err) => panic!("deserialize failed: {err}"),
        };
        assert_eq!(config, author_config());
    }
}
