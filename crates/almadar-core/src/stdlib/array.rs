//! `array/*`
//!
//! Every operator returns a new array; inputs are never modified.

use crate::eval::{apply_lambda, arg, eval_args, num, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value, ValueMap};
use std::cmp::Ordering;

/// Largest array `array/range` will build
const MAX_RANGE: usize = 100_000;

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("array/length", OpKind::Pure, |a, e, c| {
            Value::from(list(a, 0, e, c).len())
        })
        .register("array/get", OpKind::Pure, array_get)
        .register("array/push", OpKind::Pure, array_push)
        .register("array/pop", OpKind::Pure, array_pop)
        .register("array/slice", OpKind::Pure, array_slice)
        .register("array/reverse", OpKind::Pure, |a, e, c| {
            let mut items = list(a, 0, e, c);
            items.reverse();
            Value::Array(items)
        })
        .register("array/sort", OpKind::Pure, array_sort)
        .register("array/sort-by", OpKind::Pure, array_sort_by)
        .register("array/unique", OpKind::Pure, array_unique)
        .register("array/flatten", OpKind::Pure, array_flatten)
        .register("array/range", OpKind::Pure, array_range)
        .register("array/index-of", OpKind::Pure, array_index_of)
        .register("array/zip", OpKind::Pure, array_zip)
        .register("array/group-by", OpKind::Pure, array_group_by)
        .register("array/chunk", OpKind::Pure, array_chunk);
}

/// Evaluate argument `i` as a list (non-arrays are empty)
fn list(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext) -> Vec<Value> {
    match arg(args, i, ev, ctx) {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Resolve a possibly negative offset, clamped to `0..=len`
fn offset(n: f64, len: usize) -> usize {
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc() as i64;
    let n = if n < 0 { len as i64 + n } else { n };
    n.clamp(0, len as i64) as usize
}

/// Apply a key selector: a field path string or a lambda
fn select(selector: &SExpr, item: &Value, index: usize, ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    match selector.as_literal_str() {
        Some(path) => item.get_path(&path.split('.').collect::<Vec<_>>()),
        None => apply_lambda(selector, item.clone(), index, ev, ctx),
    }
}

fn descending(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext) -> bool {
    arg(args, i, ev, ctx).as_str() == Some("desc")
}

fn array_get(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let items = list(args, 0, ev, ctx);
    let index = num(args, 1, ev, ctx);
    if !index.is_finite() {
        return Value::Undefined;
    }
    let i = index.trunc() as i64;
    let i = if i < 0 { items.len() as i64 + i } else { i };
    usize::try_from(i)
        .ok()
        .and_then(|i| items.get(i).cloned())
        .unwrap_or_default()
}

fn array_push(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let mut items = list(args, 0, ev, ctx);
    items.extend(eval_args(&args[args.len().min(1)..], ev, ctx));
    Value::Array(items)
}

/// The array without its last element
fn array_pop(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let mut items = list(args, 0, ev, ctx);
    items.pop();
    Value::Array(items)
}

fn array_slice(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let items = list(args, 0, ev, ctx);
    let start = offset(num(args, 1, ev, ctx), items.len());
    let end = if args.len() > 2 {
        offset(num(args, 2, ev, ctx), items.len())
    } else {
        items.len()
    };
    if start >= end {
        return Value::Array(Vec::new());
    }
    Value::Array(items[start..end].to_vec())
}

fn order(a: &Value, b: &Value) -> Ordering {
    a.compare(b).unwrap_or(Ordering::Equal)
}

/// `["array/sort", list, "asc"|"desc"?]`
fn array_sort(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let mut items = list(args, 0, ev, ctx);
    let desc = descending(args, 1, ev, ctx);
    items.sort_by(|a, b| if desc { order(b, a) } else { order(a, b) });
    Value::Array(items)
}

/// `["array/sort-by", list, key, "asc"|"desc"?]`; stable
fn array_sort_by(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let items = list(args, 0, ev, ctx);
    let Some(selector) = args.get(1) else {
        return Value::Array(items);
    };
    let desc = descending(args, 2, ev, ctx);
    let mut keyed: Vec<(Value, Value)> = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| (select(selector, &item, i, ev, ctx), item))
        .collect();
    keyed.sort_by(|(ka, _), (kb, _)| if desc { order(kb, ka) } else { order(ka, kb) });
    Value::Array(keyed.into_iter().map(|(_, item)| item).collect())
}

fn array_unique(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let mut seen: Vec<Value> = Vec::new();
    for item in list(args, 0, ev, ctx) {
        if !seen.iter().any(|s| s.loose_eq(&item)) {
            seen.push(item);
        }
    }
    Value::Array(seen)
}

fn flatten_into(items: Vec<Value>, depth: usize, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth > 0 => flatten_into(inner, depth - 1, out),
            other => out.push(other),
        }
    }
}

/// `["array/flatten", list, depth?]`; depth defaults to 1
fn array_flatten(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let items = list(args, 0, ev, ctx);
    let depth = if args.len() > 1 {
        let d = num(args, 1, ev, ctx);
        if d.is_finite() && d > 0.0 { d as usize } else { 0 }
    } else {
        1
    };
    let mut out = Vec::new();
    flatten_into(items, depth, &mut out);
    Value::Array(out)
}

/// `["array/range", end]` or `["array/range", start, end, step?]`, end exclusive
fn array_range(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let (start, end) = if args.len() < 2 {
        (0.0, num(args, 0, ev, ctx))
    } else {
        (num(args, 0, ev, ctx), num(args, 1, ev, ctx))
    };
    let step = if args.len() > 2 {
        num(args, 2, ev, ctx)
    } else if start <= end {
        1.0
    } else {
        -1.0
    };
    if !start.is_finite() || !end.is_finite() || !step.is_finite() || step == 0.0 {
        return Value::Array(Vec::new());
    }
    let mut out = Vec::new();
    let mut x = start;
    while ((step > 0.0 && x < end) || (step < 0.0 && x > end)) && out.len() < MAX_RANGE {
        out.push(Value::number(x));
        x += step;
    }
    Value::Array(out)
}

fn array_index_of(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let items = list(args, 0, ev, ctx);
    let needle = arg(args, 1, ev, ctx);
    match items.iter().position(|v| v.loose_eq(&needle)) {
        Some(i) => Value::from(i),
        None => Value::Int(-1),
    }
}

/// Pairs elements up to the shortest input
fn array_zip(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let lists: Vec<Vec<Value>> = (0..args.len()).map(|i| list(args, i, ev, ctx)).collect();
    let len = lists.iter().map(Vec::len).min().unwrap_or(0);
    Value::Array(
        (0..len)
            .map(|i| Value::Array(lists.iter().map(|l| l[i].clone()).collect()))
            .collect(),
    )
}

/// `["array/group-by", list, key]` → object of key text to items
fn array_group_by(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let items = list(args, 0, ev, ctx);
    let Some(selector) = args.get(1) else {
        return Value::object();
    };
    let mut groups = ValueMap::new();
    for (i, item) in items.into_iter().enumerate() {
        let key = select(selector, &item, i, ev, ctx).to_text();
        if let Value::Array(group) = groups
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            group.push(item);
        }
    }
    Value::Object(groups)
}

fn array_chunk(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let items = list(args, 0, ev, ctx);
    let size = num(args, 1, ev, ctx);
    if !size.is_finite() || size < 1.0 {
        return Value::Array(Vec::new());
    }
    Value::Array(
        items
            .chunks(size as usize)
            .map(|chunk| Value::Array(chunk.to_vec()))
            .collect(),
    )
}
