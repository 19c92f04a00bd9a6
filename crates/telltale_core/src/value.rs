//! Dynamic payload values carried by events and replay commands.
//!
//! JSON encoding is untagged so payloads read naturally on disk. Map key
//! order is preserved as inserted; hashing canonicalizes separately.

use crate::error::CoreResult;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered string-keyed map of values
pub type Metadata = IndexMap<String, Value>;

/// A dynamically typed diagnostics value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Ordered sequence
    List(Vec<Value>),
    /// Ordered map
    Map(Metadata),
}

impl Value {
    /// Build a map value from key/value pairs, keeping their order
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Convert any serializable type into a `Value`
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails (e.g. non-string map keys)
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    /// Check for `Null`
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view; integers widen to `f64`
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view; floats are not truncated
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Map view
    #[must_use]
    pub const fn as_map(&self) -> Option<&Metadata> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Look up a key when this is a map
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Short type label, used in crash bundles and CLI output
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::Float(v as f64), Self::Int)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Metadata> for Value {
    fn from(v: Metadata) -> Self {
        Self::Map(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(obj) => {
                Self::Map(obj.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json_shape() {
        let v = Value::map([("a", Value::from(1)), ("b", Value::from("x"))]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"a":1,"b":"x"}"#);
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
    }

    #[test]
    fn test_decode_picks_narrowest_variant() {
        let v: Value = serde_json::from_str("3").unwrap();
        assert_eq!(v, Value::Int(3));
        let v: Value = serde_json::from_str("3.5").unwrap();
        assert_eq!(v, Value::Float(3.5));
        let v: Value = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v.as_bool(), Some(true));
    }

    #[test]
    fn test_decode_preserves_map_order() {
        let v: Value = serde_json::from_str(r#"{"z":1,"a":2,"m":3}"#).unwrap();
        let keys: Vec<&str> = v.as_map().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(4).as_f64(), Some(4.0));
        assert_eq!(Value::Float(4.5).as_i64(), None);
        assert_eq!(Value::from("s").as_f64(), None);
    }

    #[test]
    fn test_from_serialize_struct() {
        #[derive(Serialize)]
        struct Pos {
            x: i32,
            y: f64,
        }
        let v = Value::from_serialize(&Pos { x: 1, y: 2.5 }).unwrap();
        assert_eq!(v.get("x"), Some(&Value::Int(1)));
        assert_eq!(v.get("y"), Some(&Value::Float(2.5)));
    }

    #[test]
    fn test_large_u64_widens_to_float() {
        assert_eq!(Value::from(u64::MAX).kind(), "float");
        assert_eq!(Value::from(7u64), Value::Int(7));
    }

    #[test]
    fn test_option_and_vec_conversions() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(
            Value::from(vec![1, 2]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }
}
