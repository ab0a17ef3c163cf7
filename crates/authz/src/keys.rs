//! Cache-key fingerprints for check sub-problems.
//!
//! The fingerprint must be identical across processes and runs, and
//! independent of contextual-tuple and context-map ordering: the same
//! sub-problem must always land on the same cache entry.

use crate::error::{CheckError, Result};
use rebac_models::ResolveCheckRequest;
use serde_json::Value;
use xxhash_rust::xxh64::Xxh64;

/// Namespaces sub-problem keys against other caches sharing the store.
pub const CACHE_KEY_PREFIX: &str = "sc.";

const XXH64_SEED: u64 = 0;

/// The 64-bit fingerprint of a check request, rendered as a decimal
/// string.
pub fn check_request_cache_key(req: &ResolveCheckRequest) -> Result<String> {
    let mut hasher = Xxh64::new(XXH64_SEED);
    hasher.update(
        format!(
            "{}{}/{}/{}",
            CACHE_KEY_PREFIX, req.store_id, req.model_id, req.tuple_key
        )
        .as_bytes(),
    );

    // Contextual tuples are a multiset: XOR-fold per-tuple hashes so input
    // order cannot matter, and mix in the count so {A, A} and {A} differ.
    let mut fold: u64 = 0;
    for tuple in &req.contextual_tuples {
        let mut tuple_hasher = Xxh64::new(XXH64_SEED);
        tuple_hasher.update(tuple.to_string().as_bytes());
        fold ^= tuple_hasher.digest();
    }
    hasher.update(&fold.to_le_bytes());
    hasher.update(&(req.contextual_tuples.len() as u64).to_le_bytes());

    let mut keys: Vec<&String> = req.context.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        write_value(&mut hasher, &req.context[key])?;
        hasher.update(b",");
    }

    Ok(hasher.digest().to_string())
}

/// Feed a context value in canonical form: maps recurse with sorted keys,
/// arrays preserve order, every leaf is tagged by type.
fn write_value(hasher: &mut Xxh64, value: &Value) -> Result<()> {
    match value {
        Value::Null => hasher.update(b"null"),
        Value::Bool(b) => {
            hasher.update(b"b:");
            hasher.update(if *b { &b"true"[..] } else { &b"false"[..] });
        }
        Value::String(s) => {
            hasher.update(b"s:");
            hasher.update(s.as_bytes());
        }
        Value::Number(n) => {
            hasher.update(b"n:");
            write_number(hasher, n)?;
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                write_value(hasher, item)?;
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        Value::Object(map) => {
            hasher.update(b"{");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                write_value(hasher, &map[key])?;
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
    }
    Ok(())
}

/// Observationally equal numbers must hash equally: integral floats hash
/// as integers, `-0` as `0`.
fn write_number(hasher: &mut Xxh64, number: &serde_json::Number) -> Result<()> {
    if let Some(i) = number.as_i64() {
        hasher.update(i.to_string().as_bytes());
        return Ok(());
    }
    if let Some(u) = number.as_u64() {
        hasher.update(u.to_string().as_bytes());
        return Ok(());
    }
    let Some(f) = number.as_f64() else {
        return Err(CheckError::Internal(format!(
            "unhashable context number: {}",
            number
        )));
    };
    if !f.is_finite() {
        return Err(CheckError::Internal(format!(
            "non-finite context number: {}",
            number
        )));
    }
    let f = if f == 0.0 { 0.0 } else { f };
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        hasher.update((f as i64).to_string().as_bytes());
    } else {
        hasher.update(f.to_string().as_bytes());
    }
    Ok(())
}
