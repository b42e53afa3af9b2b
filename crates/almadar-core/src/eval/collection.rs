//! Pure collection operators

use super::{apply_lambda, arg, eval_args, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};

pub(crate) fn register(table: &mut OperatorTable) {
    table
        .register("map", OpKind::Pure, op_map)
        .register("filter", OpKind::Pure, op_filter)
        .register("find", OpKind::Pure, op_find)
        .register("count", OpKind::Pure, op_count)
        .register("sum", OpKind::Pure, op_sum)
        .register("first", OpKind::Pure, op_first)
        .register("last", OpKind::Pure, op_last)
        .register("nth", OpKind::Pure, op_nth)
        .register("concat", OpKind::Pure, op_concat)
        .register("includes", OpKind::Pure, op_includes)
        .register("empty", OpKind::Pure, op_empty);
}

/// Elements of a collection argument; objects yield their values
pub(crate) fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(list) => list,
        Value::Object(map) => map.into_values().collect(),
        _ => Vec::new(),
    }
}

fn op_map(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(lambda) = args.get(1) else {
        return Value::Undefined;
    };
    let list = items(arg(args, 0, ev, ctx));
    Value::Array(
        list.into_iter()
            .enumerate()
            .map(|(i, item)| apply_lambda(lambda, item, i, ev, ctx))
            .collect(),
    )
}

fn op_filter(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(lambda) = args.get(1) else {
        return Value::Undefined;
    };
    let list = items(arg(args, 0, ev, ctx));
    let mut kept = Vec::new();
    for (i, item) in list.into_iter().enumerate() {
        if apply_lambda(lambda, item.clone(), i, ev, ctx).is_truthy() {
            kept.push(item);
        }
    }
    Value::Array(kept)
}

fn op_find(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(lambda) = args.get(1) else {
        return Value::Undefined;
    };
    let list = items(arg(args, 0, ev, ctx));
    for (i, item) in list.into_iter().enumerate() {
        if apply_lambda(lambda, item.clone(), i, ev, ctx).is_truthy() {
            return item;
        }
    }
    Value::Undefined
}

/// `["count", coll]` or `["count", coll, predicate]`
fn op_count(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let value = arg(args, 0, ev, ctx);
    match args.get(1) {
        None => Value::from(value.len().unwrap_or(0)),
        Some(lambda) => {
            let mut n = 0usize;
            for (i, item) in items(value).into_iter().enumerate() {
                if apply_lambda(lambda, item, i, ev, ctx).is_truthy() {
                    n += 1;
                }
            }
            Value::from(n)
        }
    }
}

/// `["sum", coll]` or `["sum", coll, selector]`
fn op_sum(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let list = items(arg(args, 0, ev, ctx));
    let mut total = 0.0;
    for (i, item) in list.into_iter().enumerate() {
        total += match args.get(1) {
            Some(lambda) => apply_lambda(lambda, item, i, ev, ctx).to_number(),
            None => item.to_number(),
        };
    }
    Value::number(total)
}

fn op_first(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    match arg(args, 0, ev, ctx) {
        Value::Array(list) => list.into_iter().next().unwrap_or_default(),
        Value::String(s) => s.chars().next().map(Value::from_char).unwrap_or_default(),
        _ => Value::Undefined,
    }
}

fn op_last(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    match arg(args, 0, ev, ctx) {
        Value::Array(list) => list.into_iter().next_back().unwrap_or_default(),
        Value::String(s) => s.chars().next_back().map(Value::from_char).unwrap_or_default(),
        _ => Value::Undefined,
    }
}

/// `["nth", coll, index]`; negative indexes count from the end
fn op_nth(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let list = arg(args, 0, ev, ctx);
    let index = arg(args, 1, ev, ctx).to_number();
    let Value::Array(list) = list else {
        return Value::Undefined;
    };
    match resolve_index(index, list.len()) {
        Some(i) => list[i].clone(),
        None => Value::Undefined,
    }
}

/// Map a possibly negative index onto `0..len`
pub(crate) fn resolve_index(index: f64, len: usize) -> Option<usize> {
    if !index.is_finite() {
        return None;
    }
    let index = index.trunc() as i64;
    let resolved = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

/// Concatenate arrays, or strings when the first argument is not an array
fn op_concat(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let values = eval_args(args, ev, ctx);
    if matches!(values.first(), Some(Value::Array(_))) {
        let mut out = Vec::new();
        for value in values {
            match value {
                Value::Array(list) => out.extend(list),
                other => out.push(other),
            }
        }
        Value::Array(out)
    } else {
        Value::String(values.iter().map(Value::to_text).collect())
    }
}

/// `["includes", coll, value]`: array membership or substring
fn op_includes(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let haystack = arg(args, 0, ev, ctx);
    let needle = arg(args, 1, ev, ctx);
    Value::Bool(match &haystack {
        Value::Array(list) => list.iter().any(|v| v.loose_eq(&needle)),
        Value::String(s) => s.contains(needle.to_text().as_str()),
        Value::Object(map) => map.contains_key(needle.to_text().as_str()),
        _ => false,
    })
}

fn op_empty(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let value = arg(args, 0, ev, ctx);
    Value::Bool(value.is_nullish() || value.len() == Some(0))
}
