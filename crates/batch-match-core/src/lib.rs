//! batch-match-core: declarative mapping-and-matching engine.
//!
//! Batches per-item lookups across heterogeneous data sources and
//! re-associates the batched results with their originating items under any
//! relationship cardinality. The pieces, leaves first:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               batch-match-core                  │
//! ├─────────────────────────────────────────────────┤
//! │  path/       - root/roots path expressions      │
//! │  expr/       - whitelisted transform language   │
//! │  mapping/    - declarative mapping evaluation   │
//! │  hash/       - order-insensitive canonical hash │
//! │  subset/     - combinatorial key extraction     │
//! │  selection/  - field-selection compile & splice │
//! │  matcher/    - entity-to-root bucketing         │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Every component is a pure, stateless transformation over
//! `serde_json::Value`; the batched fetch itself belongs to the caller.

pub mod error;
pub mod expr;
pub mod hash;
pub mod mapping;
pub mod matcher;
pub mod path;
pub mod selection;
pub mod subset;

pub use error::{MappingError, MappingResult};
pub use expr::TransformExpr;
pub use hash::canonical_hash;
pub use mapping::{apply_mapping, validate_mapping, MappingContext};
pub use matcher::map_entities_to_roots;
pub use path::{is_path_expression, parse_path, PathExpr};
pub use selection::{key_field_paths, SelectionField, SelectionSet};
pub use subset::{extract_combinatorial_subsets, extract_subset};
