//! `validate/*` predicates, all returning booleans

use crate::eval::{arg, num, text, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};
use regex::Regex;
use std::sync::LazyLock;

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

static URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").ok());

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("validate/required", OpKind::Pure, |a, e, c| {
            Value::Bool(is_present(&arg(a, 0, e, c)))
        })
        .register("validate/email", OpKind::Pure, |a, e, c| {
            Value::Bool(matches_static(&EMAIL, &text(a, 0, e, c)))
        })
        .register("validate/url", OpKind::Pure, |a, e, c| {
            Value::Bool(matches_static(&URL, &text(a, 0, e, c)))
        })
        .register("validate/min-length", OpKind::Pure, |a, e, c| {
            length_check(a, e, c, |len, n| len as f64 >= n)
        })
        .register("validate/max-length", OpKind::Pure, |a, e, c| {
            length_check(a, e, c, |len, n| len as f64 <= n)
        })
        .register("validate/pattern", OpKind::Pure, |a, e, c| {
            let (subject, pattern) = (text(a, 0, e, c), text(a, 1, e, c));
            Value::Bool(e.patterns().is_match(&subject, &pattern))
        })
        .register("validate/range", OpKind::Pure, validate_range)
        .register("validate/number", OpKind::Pure, |a, e, c| {
            Value::Bool(numeric(&arg(a, 0, e, c)).is_some())
        })
        .register("validate/integer", OpKind::Pure, |a, e, c| {
            Value::Bool(numeric(&arg(a, 0, e, c)).is_some_and(|n| n.fract() == 0.0))
        });
}

/// Not nullish, not blank text, not an empty collection
fn is_present(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn matches_static(re: &LazyLock<Option<Regex>>, subject: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(subject))
}

/// Finite numeric value of a number or numeric string
fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Int(_) | Value::Float(_) => value.to_number(),
        Value::String(s) if !s.trim().is_empty() => value.to_number(),
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn length_check(
    args: &[SExpr],
    ev: &Evaluator,
    ctx: &mut EvalContext,
    check: fn(usize, f64) -> bool,
) -> Value {
    let value = arg(args, 0, ev, ctx);
    let limit = num(args, 1, ev, ctx);
    match value.len() {
        Some(len) if !limit.is_nan() => Value::Bool(check(len, limit)),
        _ => Value::Bool(false),
    }
}

/// `["validate/range", v, min, max]`, inclusive
fn validate_range(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let value = numeric(&arg(args, 0, ev, ctx));
    let lo = num(args, 1, ev, ctx);
    let hi = num(args, 2, ev, ctx);
    Value::Bool(value.is_some_and(|n| n >= lo && n <= hi))
}

#[cfg(test)]
mod tests {
    use crate::{EvalContext, Evaluator, SExpr, Value};
    use serde_json::json;

    fn check(json: serde_json::Value) -> bool {
        let expr = SExpr::from_json(json).unwrap();
        Evaluator::new().evaluate_guard(&expr, &mut EvalContext::default())
    }

    #[test]
    fn test_required() {
        assert!(check(json!(["validate/required", "x"])));
        assert!(check(json!(["validate/required", 0])));
        assert!(!check(json!(["validate/required", "  "])));
        assert!(!check(json!(["validate/required", null])));
        assert!(!check(json!(["validate/required", "@payload.missing"])));
    }

    #[test]
    fn test_email_and_url() {
        assert!(check(json!(["validate/email", "ann@example.com"])));
        assert!(!check(json!(["validate/email", "ann@example"])));
        assert!(!check(json!(["validate/email", "a b@example.com"])));
        assert!(check(json!(["validate/url", "https://example.com/x?y=1"])));
        assert!(!check(json!(["validate/url", "ftp://example.com"])));
    }

    #[test]
    fn test_lengths_and_pattern() {
        assert!(check(json!(["validate/min-length", "abc", 3])));
        assert!(!check(json!(["validate/min-length", "ab", 3])));
        assert!(check(json!(["validate/max-length", [1, 2], 2])));
        assert!(!check(json!(["validate/max-length", 12345, 2])));
        assert!(check(json!(["validate/pattern", "AB-12", "^[A-Z]+-\\d+$"])));
        assert!(!check(json!(["validate/pattern", "x", "("])));
    }

    #[test]
    fn test_numbers() {
        assert!(check(json!(["validate/number", "3.5"])));
        assert!(!check(json!(["validate/number", "abc"])));
        assert!(!check(json!(["validate/number", ""])));
        assert!(check(json!(["validate/integer", 4])));
        assert!(!check(json!(["validate/integer", 4.5])));
        assert!(check(json!(["validate/range", 5, 1, 5])));
        assert!(!check(json!(["validate/range", 6, 1, 5])));
        let ev = Evaluator::new();
        let expr = SExpr::from_json(json!(["validate/number", 1])).unwrap();
        assert_eq!(ev.evaluate(&expr, &mut EvalContext::default()), Value::Bool(true));
    }
}
