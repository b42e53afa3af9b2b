//! `object/*`

use crate::eval::{arg, eval_args, Evaluator, OpKind, OperatorTable};
use crate::value::set_path;
use crate::{EvalContext, SExpr, Value, ValueMap};

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("object/get", OpKind::Pure, object_get)
        .register("object/set", OpKind::Pure, object_set)
        .register("object/keys", OpKind::Pure, |a, e, c| {
            Value::Array(map(a, 0, e, c).into_keys().map(Value::from).collect())
        })
        .register("object/values", OpKind::Pure, |a, e, c| {
            Value::Array(map(a, 0, e, c).into_values().collect())
        })
        .register("object/entries", OpKind::Pure, |a, e, c| {
            Value::Array(
                map(a, 0, e, c)
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::from(k), v]))
                    .collect(),
            )
        })
        .register("object/merge", OpKind::Pure, object_merge)
        .register("object/has", OpKind::Pure, object_has)
        .register("object/pick", OpKind::Pure, |a, e, c| select_keys(a, e, c, true))
        .register("object/omit", OpKind::Pure, |a, e, c| select_keys(a, e, c, false));
}

fn map(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext) -> ValueMap {
    match arg(args, i, ev, ctx) {
        Value::Object(map) => map,
        _ => ValueMap::new(),
    }
}

/// A path given as `"a.b"` or as an array of segments
fn path_of(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(Value::to_text).collect(),
        other => other
            .to_text()
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// `["object/get", obj, path, default?]`
fn object_get(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let target = arg(args, 0, ev, ctx);
    let path = path_of(&arg(args, 1, ev, ctx));
    match target.get_path(&path) {
        Value::Undefined => arg(args, 2, ev, ctx),
        found => found,
    }
}

/// Copy of `obj` with `value` written at `path`
fn object_set(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let mut target = map(args, 0, ev, ctx);
    let path = path_of(&arg(args, 1, ev, ctx));
    let value = arg(args, 2, ev, ctx);
    if !set_path(&mut target, &path, value) {
        tracing::debug!(path = ?path, "object/set path blocked by a non-object value");
    }
    Value::Object(target)
}

/// Shallow merge, later objects win
fn object_merge(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let mut merged = ValueMap::new();
    for value in eval_args(args, ev, ctx) {
        if let Value::Object(map) = value {
            merged.extend(map);
        }
    }
    Value::Object(merged)
}

fn object_has(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let target = arg(args, 0, ev, ctx);
    let path = path_of(&arg(args, 1, ev, ctx));
    Value::Bool(!path.is_empty() && !target.get_path(&path).is_undefined())
}

/// `["object/pick", obj, "a", "b"]`; a single array of keys also works
fn select_keys(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext, keep: bool) -> Value {
    let source = map(args, 0, ev, ctx);
    let keys: Vec<String> = match eval_args(&args[args.len().min(1)..], ev, ctx).as_slice() {
        [Value::Array(items)] => items.iter().map(Value::to_text).collect(),
        values => values.iter().map(Value::to_text).collect(),
    };
    Value::Object(
        source
            .into_iter()
            .filter(|(k, _)| keys.contains(k) == keep)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use crate::{EvalContext, Evaluator, SExpr};
    use serde_json::json;

    fn eval(json: serde_json::Value) -> serde_json::Value {
        let expr = SExpr::from_json(json).unwrap();
        let mut ctx = EvalContext::default().with_payload(json!({
            "user": {"name": "Ann", "address": {"city": "Oslo"}, "age": 3}
        }));
        Evaluator::new().evaluate(&expr, &mut ctx).to_json()
    }

    #[test]
    fn test_get_and_has() {
        assert_eq!(eval(json!(["object/get", "@payload.user", "address.city"])), json!("Oslo"));
        assert_eq!(eval(json!(["object/get", "@payload.user", "zip", "none"])), json!("none"));
        assert_eq!(eval(json!(["object/has", "@payload.user", "name"])), json!(true));
        assert_eq!(eval(json!(["object/has", "@payload.user", "email"])), json!(false));
    }

    #[test]
    fn test_set_does_not_touch_input() {
        assert_eq!(
            eval(json!(["object/set", {"a": 1}, "b.c", 2])),
            json!({"a": 1, "b": {"c": 2}})
        );
        assert_eq!(
            eval(json!(["do", ["object/set", "@payload.user", "name", "Bo"], "@payload.user.name"])),
            json!("Ann")
        );
    }

    #[test]
    fn test_keys_values_entries() {
        assert_eq!(eval(json!(["object/keys", {"a": 1, "b": 2}])), json!(["a", "b"]));
        assert_eq!(eval(json!(["object/values", {"a": 1, "b": 2}])), json!([1, 2]));
        assert_eq!(eval(json!(["object/entries", {"a": 1}])), json!([["a", 1]]));
        assert_eq!(eval(json!(["object/keys", 5])), json!([]));
    }

    #[test]
    fn test_merge_pick_omit() {
        assert_eq!(
            eval(json!(["object/merge", {"a": 1, "b": 1}, {"b": 2}, null])),
            json!({"a": 1, "b": 2})
        );
        assert_eq!(eval(json!(["object/pick", "@payload.user", "name", "age"])), json!({"name": "Ann", "age": 3}));
        assert_eq!(
            eval(json!(["object/omit", "@payload.user", "address"])),
            json!({"name": "Ann", "age": 3})
        );
    }
}
