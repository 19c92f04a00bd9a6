//! Canonical state hashing for replay checkpoints.
//!
//! A value is rendered as compact JSON with every map's keys sorted
//! explicitly, then hashed with SHA-256. Key insertion order never affects
//! the result.

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateHash([u8; 32]);

impl StateHash {
    /// The number of bytes in a hash
    pub const LEN: usize = 32;

    /// Hash raw bytes
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash a value's canonical form
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        Self::compute(canonical_json(value).as_bytes())
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to lowercase hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(hex: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex)
            .map_err(|e| CoreError::invalid_argument("hash", e.to_string()))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CoreError::invalid_argument(
                "hash",
                format!("length {} (expected {})", bytes.len(), Self::LEN),
            )
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for StateHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hex SHA-256 of a value's canonical JSON form
#[must_use]
pub fn compute_state_hash(value: &Value) -> String {
    StateHash::of_value(value).to_hex()
}

/// Hash any serializable state by first converting it to a [`Value`]
///
/// # Errors
///
/// Returns error if the state cannot be represented as JSON
pub fn compute_state_hash_of<T: Serialize + ?Sized>(state: &T) -> CoreResult<String> {
    Ok(compute_state_hash(&Value::from_serialize(state)?))
}

/// Compact JSON with map keys sorted at every depth
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    canonical_tree(value).to_string()
}

fn canonical_tree(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        // Non-finite floats have no JSON form; serde_json writes them as null too.
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(canonical_tree).collect()),
        Value::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(keys.len());
            for key in keys {
                out.insert(key.clone(), canonical_tree(&map[key.as_str()]));
            }
            serde_json::Value::Object(out)
        }
    }
}
