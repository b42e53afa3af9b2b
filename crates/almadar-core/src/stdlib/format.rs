//! `format/*` display helpers

use super::time::{render, timestamp, to_datetime};
use crate::eval::{arg, num, text, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("format/number", OpKind::Pure, format_number)
        .register("format/currency", OpKind::Pure, format_currency)
        .register("format/percent", OpKind::Pure, format_percent)
        .register("format/date", OpKind::Pure, format_date)
        .register("format/json", OpKind::Pure, format_json);
}

/// Optional integer argument, clamped to a sane number of decimals
fn decimals(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext, default: usize) -> usize {
    if args.len() <= i {
        return default;
    }
    let n = num(args, i, ev, ctx);
    if n.is_finite() && n >= 0.0 {
        (n as usize).min(12)
    } else {
        default
    }
}

/// `1234.5` → `1,234.50` with two decimals
pub(crate) fn group_thousands(n: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, n.abs());
    let (whole, frac) = match fixed.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (fixed.as_str(), None),
    };
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(frac) = frac {
        grouped.push('.');
        grouped.push_str(frac);
    }
    let negative = n < 0.0 && grouped.chars().any(|c| c.is_ascii_digit() && c != '0');
    if negative {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn non_finite(n: f64) -> Option<Value> {
    if n.is_nan() {
        Some(Value::from("NaN"))
    } else if n.is_infinite() {
        Some(Value::from(if n > 0.0 { "Infinity" } else { "-Infinity" }))
    } else {
        None
    }
}

/// `["format/number", n, decimals?]`
fn format_number(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let n = num(args, 0, ev, ctx);
    let places = decimals(args, 1, ev, ctx, 0);
    non_finite(n).unwrap_or_else(|| Value::String(group_thousands(n, places)))
}

fn currency_symbol(code: &str) -> Option<(&'static str, usize)> {
    Some(match code {
        "USD" => ("$", 2),
        "EUR" => ("€", 2),
        "GBP" => ("£", 2),
        "JPY" => ("¥", 0),
        "INR" => ("₹", 2),
        _ => return None,
    })
}

/// `["format/currency", n, code?, decimals?]`; code defaults to USD
fn format_currency(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let n = num(args, 0, ev, ctx);
    let code = if args.len() > 1 {
        text(args, 1, ev, ctx).to_uppercase()
    } else {
        "USD".to_string()
    };
    if let Some(value) = non_finite(n) {
        return value;
    }
    let (symbol, default_places) = match currency_symbol(&code) {
        Some((symbol, places)) => (symbol.to_string(), places),
        None => (format!("{} ", code), 2),
    };
    let places = decimals(args, 2, ev, ctx, default_places);
    let amount = group_thousands(n, places);
    match amount.strip_prefix('-') {
        Some(positive) => Value::String(format!("-{}{}", symbol, positive)),
        None => Value::String(format!("{}{}", symbol, amount)),
    }
}

/// `["format/percent", ratio, decimals?]`; `0.25` → `25%`
fn format_percent(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let n = num(args, 0, ev, ctx);
    let places = decimals(args, 1, ev, ctx, 0);
    non_finite(n).unwrap_or_else(|| Value::String(format!("{:.*}%", places, n * 100.0)))
}

/// `["format/date", ts, pattern?]`; pattern defaults to `%Y-%m-%d`
fn format_date(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let ts = arg(args, 0, ev, ctx);
    let pattern = if args.len() > 1 {
        text(args, 1, ev, ctx)
    } else {
        "%Y-%m-%d".to_string()
    };
    timestamp(&ts)
        .and_then(to_datetime)
        .and_then(|dt| render(&dt, &pattern))
        .map(Value::String)
        .unwrap_or_default()
}

/// `["format/json", v, pretty?]`
fn format_json(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let json = arg(args, 0, ev, ctx).to_json();
    let pretty = arg(args, 1, ev, ctx).is_truthy();
    let rendered = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    match rendered {
        Ok(s) => Value::String(s),
        Err(err) => {
            tracing::warn!(error = %err, "format/json failed");
            Value::Undefined
        }
    }
}
