//! S-expression model for guards and effects
//!
//! The wire format is a JSON array `["operator", arg1, arg2, ...]`. Strings
//! starting with `@` are bindings into the evaluation context; every other
//! scalar is a literal. Arrays whose head is not an operator name are list
//! literals and objects are record literals, both of which may carry nested
//! bindings.

use crate::{Error, Result, Value, ValueMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Roots a binding may start from
pub const BINDING_ROOTS: &[&str] = &[
    "entity", "payload", "state", "now", "config", "computed", "trait",
];

/// A dotted-path reference into the evaluation context (e.g. `@entity.status`)
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// First path segment (`entity`, `payload`, a `let` name, ...)
    pub root: String,
    /// Remaining segments
    pub path: Vec<String>,
}

impl Binding {
    /// Parse `@root.a.b`; returns `None` when the string is not a binding
    pub fn parse(raw: &str) -> Option<Self> {
        let body = raw.strip_prefix('@')?;
        let mut segments = body.split('.').map(str::to_string);
        let root = segments.next().unwrap_or_default();
        Some(Self {
            root,
            path: segments.filter(|s| !s.is_empty()).collect(),
        })
    }

    /// Whether the root is one of the reserved context roots
    pub fn is_reserved(&self) -> bool {
        BINDING_ROOTS.contains(&self.root.as_str())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.root)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

/// An expression node
///
/// `Literal`, `Binding`, `List` and `Record` are atoms; `Call` applies an
/// operator.
#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    /// A constant value (containers here hold no bindings)
    Literal(Value),
    /// A reference resolved through the context
    Binding(Binding),
    /// An array literal with at least one non-constant element
    List(Vec<SExpr>),
    /// An object literal with at least one non-constant field
    Record(Vec<(String, SExpr)>),
    /// Operator application
    Call { op: String, args: Vec<SExpr> },
}

impl SExpr {
    /// Build an expression from a JSON-shaped value
    ///
    /// An array whose first element is a string not starting with `@` is
    /// always an operator call, so `["red", "blue"]` calls an operator named
    /// `red`. Arrays headed by anything else (a number, a binding, an object,
    /// nothing) are list literals. A list of plain strings is built with an
    /// operator, e.g. `["str/split", "red,blue", ","]` or `array/push` onto `[]`.
    ///
    /// Fails only on shapes that can never evaluate: an operator head that
    /// is an empty string.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(match Binding::parse(s) {
                Some(binding) => SExpr::Binding(binding),
                None => SExpr::Literal(value.clone()),
            }),
            Value::Array(items) => match items.first() {
                Some(Value::String(head)) if !head.starts_with('@') => {
                    if head.trim().is_empty() {
                        return Err(Error::construction(
                            "expression",
                            "operator name must not be empty",
                        ));
                    }
                    let args = items[1..]
                        .iter()
                        .map(SExpr::parse)
                        .collect::<Result<Vec<_>>>()?;
                    Ok(SExpr::Call {
                        op: head.clone(),
                        args,
                    })
                }
                _ => {
                    let elements = items
                        .iter()
                        .map(SExpr::parse)
                        .collect::<Result<Vec<_>>>()?;
                    if elements.iter().all(SExpr::is_constant) {
                        Ok(SExpr::Literal(Value::Array(
                            elements.into_iter().filter_map(SExpr::into_constant).collect(),
                        )))
                    } else {
                        Ok(SExpr::List(elements))
                    }
                }
            },
            Value::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, v) in map {
                    fields.push((key.clone(), SExpr::parse(v)?));
                }
                if fields.iter().all(|(_, e)| e.is_constant()) {
                    let folded: ValueMap = fields
                        .into_iter()
                        .filter_map(|(k, e)| e.into_constant().map(|v| (k, v)))
                        .collect();
                    Ok(SExpr::Literal(Value::Object(folded)))
                } else {
                    Ok(SExpr::Record(fields))
                }
            }
            other => Ok(SExpr::Literal(other.clone())),
        }
    }

    /// Parse from JSON
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        SExpr::parse(&Value::from_json(json))
    }

    /// Parse a JSON string
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        SExpr::from_json(json)
    }

    /// Create a literal expression
    pub fn lit(value: impl Into<Value>) -> Self {
        SExpr::Literal(value.into())
    }

    /// Create a binding expression from `@root.path`
    pub fn binding(raw: &str) -> Self {
        match Binding::parse(raw) {
            Some(binding) => SExpr::Binding(binding),
            None => SExpr::Literal(Value::from(raw)),
        }
    }

    /// Create an operator call
    pub fn call(op: impl Into<String>, args: Vec<SExpr>) -> Self {
        SExpr::Call {
            op: op.into(),
            args,
        }
    }

    /// Operator name if this is a call
    pub fn op(&self) -> Option<&str> {
        match self {
            SExpr::Call { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Arguments if this is a call
    pub fn args(&self) -> &[SExpr] {
        match self {
            SExpr::Call { args, .. } => args,
            _ => &[],
        }
    }

    /// Whether this node evaluates to a fixed value
    pub fn is_constant(&self) -> bool {
        matches!(self, SExpr::Literal(_))
    }

    fn into_constant(self) -> Option<Value> {
        match self {
            SExpr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// The literal string if this is a string literal
    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            SExpr::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Visit every operator name in this tree (depth first)
    pub fn visit_ops<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            SExpr::Call { op, args } => {
                f(op);
                for arg in args {
                    arg.visit_ops(f);
                }
            }
            SExpr::List(items) => items.iter().for_each(|e| e.visit_ops(f)),
            SExpr::Record(fields) => fields.iter().for_each(|(_, e)| e.visit_ops(f)),
            SExpr::Literal(_) | SExpr::Binding(_) => {}
        }
    }

    /// Convert back to the JSON-shaped value form
    pub fn to_value(&self) -> Value {
        match self {
            SExpr::Literal(v) => v.clone(),
            SExpr::Binding(b) => Value::String(b.to_string()),
            SExpr::List(items) => Value::Array(items.iter().map(SExpr::to_value).collect()),
            SExpr::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, e)| (k.clone(), e.to_value()))
                    .collect(),
            ),
            SExpr::Call { op, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(op.clone()));
                items.extend(args.iter().map(SExpr::to_value));
                Value::Array(items)
            }
        }
    }

    /// Canonical structural key used by the compiled-closure cache
    ///
    /// The key distinguishes literal type (`1` vs `1.0` vs `"1"`) and keeps
    /// record field order.
    pub fn canonical_key(&self) -> String {
        let mut out = String::new();
        self.write_key(&mut out);
        out
    }

    fn write_key(&self, out: &mut String) {
        match self {
            SExpr::Literal(v) => write_value_key(v, out),
            SExpr::Binding(b) => {
                out.push('@');
                out.push_str(&b.to_string()[1..]);
            }
            SExpr::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_key(out);
                }
                out.push(']');
            }
            SExpr::Record(fields) => {
                out.push('{');
                for (i, (k, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&format!("{:?}:", k));
                    e.write_key(out);
                }
                out.push('}');
            }
            SExpr::Call { op, args } => {
                out.push('(');
                out.push_str(op);
                for arg in args {
                    out.push(' ');
                    arg.write_key(out);
                }
                out.push(')');
            }
        }
    }
}

fn write_value_key(value: &Value, out: &mut String) {
    match value {
        Value::Undefined => out.push_str("#u"),
        Value::Null => out.push_str("#n"),
        Value::Bool(b) => out.push_str(if *b { "#t" } else { "#f" }),
        Value::Int(i) => out.push_str(&format!("i{}", i)),
        Value::Float(f) => out.push_str(&format!("f{:?}", f)),
        Value::String(s) => out.push_str(&format!("{:?}", s)),
        Value::Array(items) => {
            out.push_str("#[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value_key(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("#{");
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{:?}:", k));
                write_value_key(v, out);
            }
            out.push('}');
        }
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value().to_json())
    }
}

impl Serialize for SExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        SExpr::from_json(json).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_call_and_binding() {
        let expr = SExpr::from_json(json!(["<", "@entity.attempt", "@config.maxAttempts"])).unwrap();
        assert_eq!(expr.op(), Some("<"));
        assert_eq!(expr.args().len(), 2);
        match &expr.args()[0] {
            SExpr::Binding(b) => {
                assert_eq!(b.root, "entity");
                assert_eq!(b.path, vec!["attempt".to_string()]);
            }
            other => panic!("expected binding, got {:?}", other),
        }
    }

    #[test]
    fn test_constant_containers_fold() {
        let expr = SExpr::from_json(json!({"a": 1, "b": [1, 2]})).unwrap();
        assert!(expr.is_constant());

        let expr = SExpr::from_json(json!({"at": "@now"})).unwrap();
        assert!(matches!(expr, SExpr::Record(_)));

        let expr = SExpr::from_json(json!([1, "@payload.x"])).unwrap();
        assert!(matches!(expr, SExpr::List(_)));
    }

    #[test]
    fn test_string_headed_arrays_are_calls() {
        let expr = SExpr::from_json(json!(["set", "@entity.tags", ["red", "blue"]])).unwrap();
        let SExpr::Call { args, .. } = expr else {
            panic!("expected a call");
        };
        assert!(matches!(&args[1], SExpr::Call { op, .. } if op == "red"));

        let numbers = SExpr::from_json(json!([1, "red"])).unwrap();
        assert_eq!(numbers, SExpr::Literal(Value::from(json!([1, "red"]))));
        assert!(matches!(SExpr::from_json(json!(["@payload.tag", "red"])).unwrap(), SExpr::List(_)));
    }

    #[test]
    fn test_empty_operator_is_construction_error() {
        let err = SExpr::from_json(json!(["", 1])).unwrap_err();
        assert!(matches!(err, Error::Construction { .. }));
    }

    #[test]
    fn test_round_trip_to_value() {
        let json = json!(["emit", "STARTED", {"at": "@now"}]);
        let expr = SExpr::from_json(json.clone()).unwrap();
        assert_eq!(expr.to_value().to_json(), json);
    }

    #[test]
    fn test_canonical_key_distinguishes_literal_types() {
        let a = SExpr::from_json(json!(["+", 1, 2])).unwrap();
        let b = SExpr::from_json(json!(["+", 1.0, 2])).unwrap();
        let c = SExpr::from_json(json!(["+", "1", 2])).unwrap();
        assert_ne!(a.canonical_key(), b.canonical_key());
        assert_ne!(a.canonical_key(), c.canonical_key());
        assert_eq!(a.canonical_key(), SExpr::from_json(json!(["+", 1, 2])).unwrap().canonical_key());
    }

    #[test]
    fn test_visit_ops() {
        let expr = SExpr::from_json(json!(["when", ["=", 1, 1], ["emit", "X"]])).unwrap();
        let mut ops = Vec::new();
        expr.visit_ops(&mut |op| ops.push(op));
        assert_eq!(ops, vec!["when", "=", "emit"]);
    }

    #[test]
    fn test_deserialize_from_ron() {
        let expr: SExpr = ron::from_str(r#"["set", "@entity.status", "done"]"#).unwrap();
        assert_eq!(expr.op(), Some("set"));
    }
}
