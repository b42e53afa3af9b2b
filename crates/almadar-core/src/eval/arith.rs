//! Arithmetic operators
//!
//! All arithmetic is done in f64 and normalized back to `Int` when the result
//! is integral. Non-numeric operands coerce to NaN.

use super::{eval_args, num, numbers, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};

pub(crate) fn register(table: &mut OperatorTable) {
    table
        .register("+", OpKind::Pure, op_add)
        .register("-", OpKind::Pure, op_sub)
        .register("*", OpKind::Pure, op_mul)
        .register("/", OpKind::Pure, op_div)
        .register("%", OpKind::Pure, op_rem)
        .register("abs", OpKind::Pure, op_abs)
        .register("min", OpKind::Pure, op_min)
        .register("max", OpKind::Pure, op_max)
        .register("floor", OpKind::Pure, op_floor)
        .register("ceil", OpKind::Pure, op_ceil)
        .register("round", OpKind::Pure, op_round)
        .register("clamp", OpKind::Pure, op_clamp);
}

fn op_add(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::number(numbers(eval_args(args, ev, ctx)).iter().sum())
}

fn op_sub(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let values = numbers(eval_args(args, ev, ctx));
    match values.split_first() {
        None => Value::Int(0),
        Some((only, [])) => Value::number(-only),
        Some((first, rest)) => Value::number(rest.iter().fold(*first, |acc, n| acc - n)),
    }
}

fn op_mul(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::number(numbers(eval_args(args, ev, ctx)).iter().product())
}

fn op_div(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let values = numbers(eval_args(args, ev, ctx));
    match values.split_first() {
        None => Value::Undefined,
        Some((only, [])) => Value::number(1.0 / only),
        Some((first, rest)) => Value::number(rest.iter().fold(*first, |acc, n| acc / n)),
    }
}

fn op_rem(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::number(num(args, 0, ev, ctx) % num(args, 1, ev, ctx))
}

fn op_abs(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::number(num(args, 0, ev, ctx).abs())
}

pub(crate) fn op_min(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let values = numbers(eval_args(args, ev, ctx));
    if values.is_empty() {
        return Value::Undefined;
    }
    // NaN poisons the result
    Value::number(values.iter().fold(f64::INFINITY, |acc, n| {
        if acc.is_nan() || n.is_nan() {
            f64::NAN
        } else {
            acc.min(*n)
        }
    }))
}

pub(crate) fn op_max(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let values = numbers(eval_args(args, ev, ctx));
    if values.is_empty() {
        return Value::Undefined;
    }
    Value::number(values.iter().fold(f64::NEG_INFINITY, |acc, n| {
        if acc.is_nan() || n.is_nan() {
            f64::NAN
        } else {
            acc.max(*n)
        }
    }))
}

pub(crate) fn op_floor(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::number(num(args, 0, ev, ctx).floor())
}

pub(crate) fn op_ceil(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::number(num(args, 0, ev, ctx).ceil())
}

/// `["round", x]` or `["round", x, digits]`; halves round away from zero
pub(crate) fn op_round(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let x = num(args, 0, ev, ctx);
    if args.len() < 2 {
        return Value::number(x.round());
    }
    let digits = num(args, 1, ev, ctx);
    if !digits.is_finite() {
        return Value::number(x.round());
    }
    let factor = 10f64.powi(digits.trunc() as i32);
    Value::number((x * factor).round() / factor)
}

/// `["clamp", x, lo, hi]`
pub(crate) fn op_clamp(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let x = num(args, 0, ev, ctx);
    let lo = num(args, 1, ev, ctx);
    let hi = num(args, 2, ev, ctx);
    if x.is_nan() || lo.is_nan() || hi.is_nan() {
        return Value::Float(f64::NAN);
    }
    Value::number(x.max(lo).min(hi))
}
