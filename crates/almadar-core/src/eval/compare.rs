//! Comparison operators

use super::{arg, eval_args, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};
use std::cmp::Ordering;

pub(crate) fn register(table: &mut OperatorTable) {
    table
        .register("=", OpKind::Pure, op_eq)
        .register("!=", OpKind::Pure, op_ne)
        .register("<", OpKind::Pure, op_lt)
        .register(">", OpKind::Pure, op_gt)
        .register("<=", OpKind::Pure, op_le)
        .register(">=", OpKind::Pure, op_ge)
        .register("matches", OpKind::Pure, op_matches);
}

/// True when every adjacent pair satisfies `test`
fn chain(
    args: &[SExpr],
    ev: &Evaluator,
    ctx: &mut EvalContext,
    test: impl Fn(&Value, &Value) -> bool,
) -> Value {
    let values = eval_args(args, ev, ctx);
    if values.len() < 2 {
        return Value::Bool(false);
    }
    Value::Bool(values.windows(2).all(|pair| test(&pair[0], &pair[1])))
}

fn op_eq(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    chain(args, ev, ctx, Value::loose_eq)
}

fn op_ne(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let a = arg(args, 0, ev, ctx);
    let b = arg(args, 1, ev, ctx);
    Value::Bool(!a.loose_eq(&b))
}

fn op_lt(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    chain(args, ev, ctx, |a, b| a.compare(b) == Some(Ordering::Less))
}

fn op_gt(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    chain(args, ev, ctx, |a, b| a.compare(b) == Some(Ordering::Greater))
}

fn op_le(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    chain(args, ev, ctx, |a, b| {
        matches!(a.compare(b), Some(Ordering::Less | Ordering::Equal))
    })
}

fn op_ge(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    chain(args, ev, ctx, |a, b| {
        matches!(a.compare(b), Some(Ordering::Greater | Ordering::Equal))
    })
}

/// `["matches", value, pattern]`; an invalid pattern never matches
fn op_matches(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let subject = arg(args, 0, ev, ctx);
    let pattern = arg(args, 1, ev, ctx);
    Value::Bool(ev.patterns().is_match(&subject.to_text(), &pattern.to_text()))
}

#[cfg(test)]
mod tests {
    use crate::{EvalContext, Evaluator, SExpr, Value, ValueMap};
    use serde_json::json;

    fn eval_with(json: serde_json::Value, ctx: &mut EvalContext) -> Value {
        let expr = SExpr::from_json(json).unwrap();
        Evaluator::new().evaluate(&expr, ctx)
    }

    fn eval(json: serde_json::Value) -> Value {
        eval_with(json, &mut EvalContext::default())
    }

    #[test]
    fn test_equality() {
        assert_eq!(eval(json!(["=", 1, 1.0])), Value::Bool(true));
        assert_eq!(eval(json!(["=", "a", "a", "a"])), Value::Bool(true));
        assert_eq!(eval(json!(["=", "1", 1])), Value::Bool(false));
        assert_eq!(eval(json!(["!=", "a", "b"])), Value::Bool(true));
        assert_eq!(eval(json!(["=", null, "@entity.nothing"])), Value::Bool(true));
    }

    #[test]
    fn test_ordering() {
        assert_eq!(eval(json!(["<", 1, 2, 3])), Value::Bool(true));
        assert_eq!(eval(json!(["<", 1, 3, 2])), Value::Bool(false));
        assert_eq!(eval(json!([">=", 3, 3])), Value::Bool(true));
        assert_eq!(eval(json!(["<", "apple", "banana"])), Value::Bool(true));
        assert_eq!(eval(json!(["<", "abc", 1])), Value::Bool(false));
        assert_eq!(eval(json!([">", "abc", 1])), Value::Bool(false));
    }

    #[test]
    fn test_attempt_guard() {
        let mut entity = ValueMap::new();
        entity.insert("attempt".into(), Value::Int(2));
        let mut ctx = EvalContext::default()
            .with_entity(entity)
            .with_config(json!({"maxAttempts": 3}));
        let guard = json!(["<", "@entity.attempt", "@config.maxAttempts"]);
        assert_eq!(eval_with(guard.clone(), &mut ctx), Value::Bool(true));

        ctx.entity.insert("attempt".into(), Value::Int(3));
        assert_eq!(eval_with(guard, &mut ctx), Value::Bool(false));
    }

    #[test]
    fn test_matches() {
        assert_eq!(eval(json!(["matches", "abc-123", "^[a-z]+-\\d+$"])), Value::Bool(true));
        assert_eq!(eval(json!(["matches", "abc", "("])), Value::Bool(false));
    }

    #[test]
    fn test_matches_reuses_compiled_pattern() {
        let ev = Evaluator::new();
        let guard = SExpr::from_json(json!(["matches", "@entity.code", "^[A-Z]{3}$"])).unwrap();
        for (code, expected) in [("ABC", true), ("abc", false), ("XYZ", true)] {
            let mut entity = ValueMap::new();
            entity.insert("code".into(), Value::from(code));
            let mut ctx = EvalContext::default().with_entity(entity);
            assert_eq!(ev.evaluate_guard(&guard, &mut ctx), expected);
        }
        assert_eq!(ev.patterns().len(), 1);
        assert!(ev.clone().patterns().contains("^[A-Z]{3}$"));
    }
}
