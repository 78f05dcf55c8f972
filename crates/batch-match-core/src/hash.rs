//! Order-insensitive canonical hashing.
//!
//! The digest is invariant under array-element and object-key reordering but
//! sensitive to structural shape and scalar identity. Equal hashes mean the
//! values are structurally equal modulo that unordered semantics.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_OBJECT: u8 = 6;

/// Canonical hash of a value, rendered as lowercase hex.
#[must_use]
pub fn canonical_hash(value: &Value) -> String {
    let digest = digest_value(value);
    let mut rendered = String::with_capacity(digest.len() * 2);
    for byte in digest {
        rendered.push_str(&format!("{byte:02x}"));
    }
    rendered
}

fn digest_value(value: &Value) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match value {
        Value::Null => {
            hasher.update([TAG_NULL]);
        }
        Value::Bool(b) => {
            hasher.update([TAG_BOOL, u8::from(*b)]);
        }
        Value::Number(number) => {
            digest_number(number, &mut hasher);
        }
        Value::String(text) => {
            hasher.update([TAG_STRING]);
            hasher.update(text.as_bytes());
        }
        Value::Array(items) => {
            // Unordered-multiset semantics: sort element digests before
            // combining so reordered arrays hash identically.
            let mut digests: Vec<[u8; 32]> = items.iter().map(digest_value).collect();
            digests.sort_unstable();
            hasher.update([TAG_ARRAY]);
            hasher.update((items.len() as u64).to_le_bytes());
            for digest in digests {
                hasher.update(digest);
            }
        }
        Value::Object(entries) => {
            let mut digests: Vec<[u8; 32]> = entries
                .iter()
                .map(|(key, child)| {
                    let mut pair = Sha256::new();
                    pair.update([TAG_STRING]);
                    pair.update(key.as_bytes());
                    pair.update(digest_value(child));
                    pair.finalize().into()
                })
                .collect();
            digests.sort_unstable();
            hasher.update([TAG_OBJECT]);
            hasher.update((entries.len() as u64).to_le_bytes());
            for digest in digests {
                hasher.update(digest);
            }
        }
    }
    hasher.finalize().into()
}

/// Integral floats collapse to the integer encoding so `25` and `25.0` hash
/// identically regardless of which side of the join produced them.
#[allow(clippy::cast_possible_truncation)]
fn digest_number(number: &Number, hasher: &mut Sha256) {
    if let Some(n) = number.as_i64() {
        hasher.update([TAG_INT]);
        hasher.update(i128::from(n).to_le_bytes());
    } else if let Some(n) = number.as_u64() {
        hasher.update([TAG_INT]);
        hasher.update(i128::from(n).to_le_bytes());
    } else {
        let n = number.as_f64().unwrap_or(0.0);
        if n.is_finite() && n.fract() == 0.0 && n.abs() < 1.7e38 {
            hasher.update([TAG_INT]);
            hasher.update((n as i128).to_le_bytes());
        } else {
            hasher.update([TAG_FLOAT]);
            hasher.update(n.to_bits().to_le_bytes());
        }
    }
}
