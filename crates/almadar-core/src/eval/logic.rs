//! Logic and control operators
//!
//! These short-circuit: a branch that is not taken is never evaluated, so
//! effects inside it never run.

use super::{arg, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};

pub(crate) fn register(table: &mut OperatorTable) {
    table
        .register("and", OpKind::Pure, op_and)
        .register("or", OpKind::Pure, op_or)
        .register("not", OpKind::Pure, op_not)
        .register("if", OpKind::Pure, op_if)
        .register("let", OpKind::Pure, op_let)
        .register("do", OpKind::Pure, op_do)
        .register("when", OpKind::Pure, op_when);
}

fn op_and(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    for expr in args {
        if !ev.evaluate(expr, ctx).is_truthy() {
            return Value::Bool(false);
        }
    }
    Value::Bool(true)
}

fn op_or(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    for expr in args {
        if ev.evaluate(expr, ctx).is_truthy() {
            return Value::Bool(true);
        }
    }
    Value::Bool(false)
}

fn op_not(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::Bool(!arg(args, 0, ev, ctx).is_truthy())
}

/// `["if", cond, then, else?]`
fn op_if(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    if arg(args, 0, ev, ctx).is_truthy() {
        arg(args, 1, ev, ctx)
    } else {
        arg(args, 2, ev, ctx)
    }
}

/// Evaluate in order, returning the last value
fn op_do(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    sequence(args, ev, ctx)
}

/// `["when", cond, body...]`
fn op_when(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    if arg(args, 0, ev, ctx).is_truthy() {
        sequence(&args[1..], ev, ctx)
    } else {
        Value::Undefined
    }
}

/// `["let", [["name", expr], ...], body...]` or `["let", {"name": expr}, body...]`
///
/// Bindings are evaluated in order and each one sees the ones before it.
fn op_let(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some((bindings, body)) = args.split_first() else {
        return Value::Undefined;
    };
    let mut bound = 0;
    match bindings {
        SExpr::List(pairs) => {
            for pair in pairs {
                match pair {
                    SExpr::Call { op: name, args } => {
                        let value = arg(args, 0, ev, ctx);
                        ctx.push_local(name.trim_start_matches('@'), value);
                        bound += 1;
                    }
                    other => tracing::warn!(binding = %other, "Malformed let binding"),
                }
            }
        }
        SExpr::Record(fields) => {
            for (name, expr) in fields {
                let value = ev.evaluate(expr, ctx);
                ctx.push_local(name.as_str(), value);
                bound += 1;
            }
        }
        SExpr::Literal(Value::Object(map)) => {
            for (name, value) in map {
                ctx.push_local(name.as_str(), value.clone());
                bound += 1;
            }
        }
        other => tracing::warn!(bindings = %other, "Malformed let bindings"),
    }
    let result = sequence(body, ev, ctx);
    ctx.pop_locals(bound);
    result
}

fn sequence(exprs: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let mut last = Value::Undefined;
    for expr in exprs {
        last = ev.evaluate(expr, ctx);
    }
    last
}

#[cfg(test)]
mod tests {
    use crate::{EvalContext, Evaluator, SExpr, Value};
    use serde_json::json;

    fn run(json: serde_json::Value) -> (Value, EvalContext) {
        let expr = SExpr::from_json(json).unwrap();
        let mut ctx = EvalContext::default();
        let value = Evaluator::new().evaluate(&expr, &mut ctx);
        (value, ctx)
    }

    #[test]
    fn test_and_or_short_circuit() {
        let (value, ctx) = run(json!(["and", false, ["set", "@entity.touched", true]]));
        assert_eq!(value, Value::Bool(false));
        assert!(ctx.entity.get("touched").is_none());

        let (value, ctx) = run(json!(["or", 1, ["set", "@entity.touched", true]]));
        assert_eq!(value, Value::Bool(true));
        assert!(ctx.entity.get("touched").is_none());
    }

    #[test]
    fn test_if_only_evaluates_taken_branch() {
        let (value, ctx) = run(json!(["if", ["=", 1, 2], ["emit", "YES"], "no"]));
        assert_eq!(value, Value::from("no"));
        assert!(ctx.outcome.emitted.is_empty());

        let (value, _) = run(json!(["if", false, 1]));
        assert_eq!(value, Value::Undefined);
    }

    #[test]
    fn test_when_and_do() {
        let (value, ctx) = run(json!(["when", true, ["set", "@entity.a", 1], ["+", 1, 1]]));
        assert_eq!(value, Value::Int(2));
        assert_eq!(ctx.entity.get("a"), Some(&Value::Int(1)));

        let (value, ctx) = run(json!(["when", 0, ["set", "@entity.a", 1]]));
        assert_eq!(value, Value::Undefined);
        assert!(ctx.entity.is_empty());

        let (value, _) = run(json!(["do", 1, 2, 3]));
        assert_eq!(value, Value::Int(3));
    }

    #[test]
    fn test_let_scoping() {
        let (value, _) = run(json!(["let", [["x", 2], ["y", ["*", "@x", 10]]], ["+", "@x", "@y"]]));
        assert_eq!(value, Value::Int(22));

        let (value, _) = run(json!(["let", {"name": "Ann"}, ["str/upper", "@name"]]));
        assert_eq!(value, Value::from("ANN"));

        let (value, _) = run(json!(["do", ["let", [["x", 1]], "@x"], "@x"]));
        assert_eq!(value, Value::Undefined);
    }

    #[test]
    fn test_not() {
        assert_eq!(run(json!(["not", ""])).0, Value::Bool(true));
        assert_eq!(run(json!(["not", [1]])).0, Value::Bool(false));
    }
}
