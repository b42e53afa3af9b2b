//! Dynamic value types for schema-driven behavior
//!
//! Values are JSON-shaped with one extra variant, `Undefined`, which is what
//! a missing binding or an unknown operator evaluates to. Coercions are
//! permissive: anything can be asked for a number and the answer may be NaN.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Largest integer a float can carry without losing precision (2^53)
const MAX_SAFE_INT: f64 = 9_007_199_254_740_992.0;

/// A dynamic value flowing through guards, effects and entity records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Result of a missing binding or unknown operator
    #[default]
    Undefined,
    /// Explicit null
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value (may be NaN or infinite)
    Float(f64),
    /// String value
    String(String),
    /// Ordered list of values
    Array(Vec<Value>),
    /// Map of string keys to values
    Object(ValueMap),
}

/// A map of string keys to dynamic values
///
/// Uses IndexMap to preserve insertion order (field order survives a round trip)
pub type ValueMap = IndexMap<String, Value>;

impl Value {
    /// Build a number, collapsing integral floats into `Int`
    pub fn number(n: f64) -> Self {
        if n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_SAFE_INT {
            Value::Int(n as i64)
        } else {
            Value::Float(n)
        }
    }

    /// Build an empty object
    pub fn object() -> Self {
        Value::Object(ValueMap::new())
    }

    /// Single-character string
    pub fn from_char(c: char) -> Self {
        Value::String(c.to_string())
    }

    /// Check if this value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or undefined
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Check if this value is a number
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get this value as a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a list
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(list) => Some(list),
            _ => None,
        }
    }

    /// Try to get this value as a map
    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Try to get this value as a mutable map
    pub fn as_object_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Check if this value is truthy
    ///
    /// Falsy: `false`, null, undefined, `0`, NaN, `""`, `[]`, `{}`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(list) => !list.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    /// Coerce to a number; anything that is not numeric-looking yields NaN
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Bool(true) => 1.0,
            Value::Bool(false) | Value::Null => 0.0,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Undefined | Value::Array(_) | Value::Object(_) => f64::NAN,
        }
    }

    /// Render as plain text (strings are not quoted, nullish is empty)
    pub fn to_text(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Float(f) if f.is_nan() => "NaN".to_string(),
            Value::Float(f) if f.is_infinite() => {
                let text = if *f > 0.0 { "Infinity" } else { "-Infinity" };
                text.to_string()
            }
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
            other => other.to_string(),
        }
    }

    /// Length of a string (in chars), array or object; `None` otherwise
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(list) => Some(list.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Loose equality: numbers compare by value, null equals undefined,
    /// containers compare element-wise
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_number() && b.is_number() => a.to_number() == b.to_number(),
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Array(x), Value::Array(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(a, b)| a.loose_eq(b))
            }
            (Value::Object(x), Value::Object(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .all(|(k, v)| y.get(k).map(|w| v.loose_eq(w)).unwrap_or(false))
            }
            _ => false,
        }
    }

    /// Ordering used by `<`, `>` and sorting
    ///
    /// Two strings compare lexically; everything else compares numerically.
    /// NaN on either side is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) => a.to_number().partial_cmp(&b.to_number()),
        }
    }

    /// Walk a dotted path through objects and arrays
    ///
    /// Missing segments yield `Undefined`. `length` is answered for arrays
    /// and strings.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Value {
        let mut current = self;
        for (i, segment) in path.iter().enumerate() {
            let segment = segment.as_ref();
            current = match current {
                Value::Object(map) => match map.get(segment) {
                    Some(v) => v,
                    None => return Value::Undefined,
                },
                Value::Array(list) => {
                    if segment == "length" && i == path.len() - 1 {
                        return Value::Int(list.len() as i64);
                    }
                    match segment.parse::<usize>().ok().and_then(|idx| list.get(idx)) {
                        Some(v) => v,
                        None => return Value::Undefined,
                    }
                }
                Value::String(s) if segment == "length" && i == path.len() - 1 => {
                    return Value::Int(s.chars().count() as i64);
                }
                _ => return Value::Undefined,
            };
        }
        current.clone()
    }

    /// Convert from a JSON value
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(list) => {
                Value::Array(list.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON value
    ///
    /// `Undefined` and non-finite floats become JSON null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(list) => {
                serde_json::Value::Array(list.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Assign `value` at a dotted path inside `root`, creating objects as needed
///
/// Returns false when an intermediate segment holds a non-object value.
pub fn set_path<S: AsRef<str>>(root: &mut ValueMap, path: &[S], value: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.as_ref().to_string())
            .or_insert_with(Value::object);
        if entry.is_nullish() {
            *entry = Value::object();
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return false,
        };
    }
    current.insert(last.as_ref().to_string(), value);
    true
}

/// Serde adapter that writes a [`Value`] in its plain JSON shape
///
/// Use with `#[serde(with = "crate::value::json")]` on response structs; the
/// derived impls keep the tagged form for binary storage.
pub mod json {
    use super::Value;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Value, serializer: S) -> Result<S::Ok, S::Error> {
        value.to_json().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

/// [`json`] for a list of values
pub mod json_list {
    use super::Value;
    use serde::ser::SerializeSeq;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(values: &[Value], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_json())?;
        }
        seq.end()
    }
}

/// [`json`] for a map of values
pub mod json_map {
    use super::ValueMap;
    use serde::ser::SerializeMap;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(map: &ValueMap, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, value) in map {
            out.serialize_entry(key, &value.to_json())?;
        }
        out.end()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(list) => {
                write!(f, "[")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Object(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(vec: Vec<T>) -> Self {
        Value::Array(vec.into_iter().map(Into::into).collect())
    }
}
