//! `math/*`

use crate::eval::{eval_args, num, numbers, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("math/abs", OpKind::Pure, |a, e, c| unary(a, e, c, f64::abs))
        .register("math/sqrt", OpKind::Pure, |a, e, c| unary(a, e, c, f64::sqrt))
        .register("math/exp", OpKind::Pure, |a, e, c| unary(a, e, c, f64::exp))
        .register("math/sin", OpKind::Pure, |a, e, c| unary(a, e, c, f64::sin))
        .register("math/cos", OpKind::Pure, |a, e, c| unary(a, e, c, f64::cos))
        .register("math/tan", OpKind::Pure, |a, e, c| unary(a, e, c, f64::tan))
        .register("math/floor", OpKind::Pure, |a, e, c| unary(a, e, c, f64::floor))
        .register("math/ceil", OpKind::Pure, |a, e, c| unary(a, e, c, f64::ceil))
        .register("math/trunc", OpKind::Pure, |a, e, c| unary(a, e, c, f64::trunc))
        .register("math/round", OpKind::Pure, math_round)
        .register("math/sign", OpKind::Pure, math_sign)
        .register("math/pow", OpKind::Pure, math_pow)
        .register("math/log", OpKind::Pure, math_log)
        .register("math/min", OpKind::Pure, math_min)
        .register("math/max", OpKind::Pure, math_max)
        .register("math/clamp", OpKind::Pure, math_clamp)
        .register("math/lerp", OpKind::Pure, math_lerp)
        .register("math/random", OpKind::Pure, math_random)
        .register("math/random-int", OpKind::Pure, math_random_int)
        .register("math/pi", OpKind::Pure, |_, _, _| Value::Float(std::f64::consts::PI))
        .register("math/e", OpKind::Pure, |_, _, _| Value::Float(std::f64::consts::E));
}

fn unary(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext, f: fn(f64) -> f64) -> Value {
    Value::number(f(num(args, 0, ev, ctx)))
}

fn math_round(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let x = num(args, 0, ev, ctx);
    let digits = if args.len() > 1 { num(args, 1, ev, ctx) } else { 0.0 };
    if !digits.is_finite() || digits == 0.0 {
        return Value::number(x.round());
    }
    let factor = 10f64.powi(digits.trunc() as i32);
    Value::number((x * factor).round() / factor)
}

fn math_sign(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let x = num(args, 0, ev, ctx);
    if x.is_nan() {
        Value::Float(f64::NAN)
    } else if x == 0.0 {
        Value::Int(0)
    } else {
        Value::number(x.signum())
    }
}

fn math_pow(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::number(num(args, 0, ev, ctx).powf(num(args, 1, ev, ctx)))
}

/// Natural log, or `["math/log", x, base]`
fn math_log(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let x = num(args, 0, ev, ctx);
    if args.len() > 1 {
        Value::number(x.log(num(args, 1, ev, ctx)))
    } else {
        Value::number(x.ln())
    }
}

fn fold(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext, pick: fn(f64, f64) -> f64) -> Value {
    let values = numbers(eval_args(args, ev, ctx));
    let Some((first, rest)) = values.split_first() else {
        return Value::Undefined;
    };
    if values.iter().any(|n| n.is_nan()) {
        return Value::Float(f64::NAN);
    }
    Value::number(rest.iter().fold(*first, |acc, n| pick(acc, *n)))
}

fn math_min(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    fold(args, ev, ctx, f64::min)
}

fn math_max(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    fold(args, ev, ctx, f64::max)
}

fn math_clamp(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let x = num(args, 0, ev, ctx);
    let lo = num(args, 1, ev, ctx);
    let hi = num(args, 2, ev, ctx);
    if x.is_nan() || lo.is_nan() || hi.is_nan() {
        return Value::Float(f64::NAN);
    }
    Value::number(x.max(lo).min(hi))
}

/// `["math/lerp", a, b, t]`
fn math_lerp(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let a = num(args, 0, ev, ctx);
    let b = num(args, 1, ev, ctx);
    let t = num(args, 2, ev, ctx);
    Value::number(a + (b - a) * t)
}

/// A float in `[0, 1)`, or in `[min, max)` with two arguments
fn math_random(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let bounds = if args.len() >= 2 {
        Some((num(args, 0, ev, ctx), num(args, 1, ev, ctx)))
    } else {
        None
    };
    let Ok(mut rng) = ev.shared.rng.lock() else {
        return Value::Undefined;
    };
    let r = rng.next_f64();
    match bounds {
        Some((lo, hi)) => Value::Float(lo + r * (hi - lo)),
        None => Value::Float(r),
    }
}

/// `["math/random-int", min, max]`, inclusive
fn math_random_int(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let lo = num(args, 0, ev, ctx);
    let hi = num(args, 1, ev, ctx);
    if !lo.is_finite() || !hi.is_finite() {
        return Value::Float(f64::NAN);
    }
    match ev.shared.rng.lock() {
        Ok(mut rng) => Value::Int(rng.range_i64(lo.ceil() as i64, hi.floor() as i64)),
        Err(_) => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::{EvalContext, Evaluator, SExpr, Value};
    use serde_json::json;

    fn eval_on(ev: &Evaluator, json: serde_json::Value) -> Value {
        let expr = SExpr::from_json(json).unwrap();
        ev.evaluate(&expr, &mut EvalContext::default())
    }

    fn eval(json: serde_json::Value) -> Value {
        eval_on(&Evaluator::new(), json)
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(eval(json!(["math/sqrt", 16])), Value::Int(4));
        assert_eq!(eval(json!(["math/pow", 2, 10])), Value::Int(1024));
        let log = eval(json!(["math/log", 8, 2])).as_float().unwrap();
        assert!((log - 3.0).abs() < 1e-9);
        assert_eq!(eval(json!(["math/exp", 0])), Value::Int(1));
        assert_eq!(eval(json!(["math/sign", -3])), Value::Int(-1));
        assert_eq!(eval(json!(["math/sign", 0])), Value::Int(0));
        assert_eq!(eval(json!(["math/trunc", -2.7])), Value::Int(-2));
        assert_eq!(eval(json!(["math/round", 1.005, 1])), Value::Int(1));
        assert_eq!(eval(json!(["math/lerp", 0, 10, 0.25])), Value::Float(2.5));
        assert_eq!(eval(json!(["math/clamp", 5, 0, 3])), Value::Int(3));
        assert_eq!(eval(json!(["math/max", 1, 9, 4])), Value::Int(9));
        assert_eq!(eval(json!(["math/min", [3, 1]])), Value::Int(1));
        assert!(matches!(eval(json!(["math/sqrt", -1])), Value::Float(f) if f.is_nan()));
    }

    #[test]
    fn test_constants() {
        assert_eq!(eval(json!(["math/pi"])), Value::Float(std::f64::consts::PI));
        assert_eq!(eval(json!(["math/e"])), Value::Float(std::f64::consts::E));
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let config = RuntimeConfig {
            rng_seed: Some(7),
            ..Default::default()
        };
        let a = Evaluator::with_config(&config);
        let b = Evaluator::with_config(&config);
        for _ in 0..10 {
            assert_eq!(eval_on(&a, json!(["math/random"])), eval_on(&b, json!(["math/random"])));
            let n = eval_on(&a, json!(["math/random-int", 1, 6])).as_int().unwrap();
            assert!((1..=6).contains(&n));
            eval_on(&b, json!(["math/random-int", 1, 6]));
        }
    }
}
