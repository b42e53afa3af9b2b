//! `str/*`
//!
//! Lengths and offsets count characters, not bytes.

use crate::eval::{arg, eval_args, num, text, Evaluator, OpKind, OperatorTable};
use crate::sexpr::Binding;
use crate::{EvalContext, SExpr, Value};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{?\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}?\}").ok());

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("str/concat", OpKind::Pure, str_concat)
        .register("str/upper", OpKind::Pure, |a, e, c| {
            Value::from(text(a, 0, e, c).to_uppercase())
        })
        .register("str/lower", OpKind::Pure, |a, e, c| {
            Value::from(text(a, 0, e, c).to_lowercase())
        })
        .register("str/trim", OpKind::Pure, |a, e, c| {
            Value::from(text(a, 0, e, c).trim())
        })
        .register("str/length", OpKind::Pure, |a, e, c| {
            Value::from(text(a, 0, e, c).chars().count())
        })
        .register("str/reverse", OpKind::Pure, |a, e, c| {
            Value::from(text(a, 0, e, c).chars().rev().collect::<String>())
        })
        .register("str/split", OpKind::Pure, str_split)
        .register("str/join", OpKind::Pure, str_join)
        .register("str/replace", OpKind::Pure, str_replace)
        .register("str/contains", OpKind::Pure, |a, e, c| {
            let (s, needle) = (text(a, 0, e, c), text(a, 1, e, c));
            Value::Bool(s.contains(needle.as_str()))
        })
        .register("str/starts-with", OpKind::Pure, |a, e, c| {
            let (s, prefix) = (text(a, 0, e, c), text(a, 1, e, c));
            Value::Bool(s.starts_with(prefix.as_str()))
        })
        .register("str/ends-with", OpKind::Pure, |a, e, c| {
            let (s, suffix) = (text(a, 0, e, c), text(a, 1, e, c));
            Value::Bool(s.ends_with(suffix.as_str()))
        })
        .register("str/substring", OpKind::Pure, str_substring)
        .register("str/pad-start", OpKind::Pure, |a, e, c| pad(a, e, c, true))
        .register("str/pad-end", OpKind::Pure, |a, e, c| pad(a, e, c, false))
        .register("str/repeat", OpKind::Pure, str_repeat)
        .register("str/template", OpKind::Pure, str_template);
}

fn str_concat(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    Value::String(eval_args(args, ev, ctx).iter().map(Value::to_text).collect())
}

/// `["str/split", s, sep]`; an empty separator splits into characters
fn str_split(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let s = text(args, 0, ev, ctx);
    let sep = text(args, 1, ev, ctx);
    if sep.is_empty() {
        return Value::Array(s.chars().map(Value::from_char).collect());
    }
    Value::Array(s.split(sep.as_str()).map(Value::from).collect())
}

/// `["str/join", list, sep?]`; separator defaults to `,`
fn str_join(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let list = arg(args, 0, ev, ctx);
    let sep = if args.len() > 1 {
        text(args, 1, ev, ctx)
    } else {
        ",".to_string()
    };
    let parts: Vec<String> = list
        .as_array()
        .map(|items| items.iter().map(Value::to_text).collect())
        .unwrap_or_default();
    Value::String(parts.join(&sep))
}

/// Replace every occurrence
fn str_replace(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let s = text(args, 0, ev, ctx);
    let from = text(args, 1, ev, ctx);
    let to = text(args, 2, ev, ctx);
    if from.is_empty() {
        return Value::String(s);
    }
    Value::String(s.replace(from.as_str(), &to))
}

/// `["str/substring", s, start, end?]`; negative offsets count from the end
fn str_substring(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let chars: Vec<char> = text(args, 0, ev, ctx).chars().collect();
    let len = chars.len() as i64;
    let clamp = |n: f64| -> usize {
        if n.is_nan() {
            return 0;
        }
        let n = n.trunc() as i64;
        let n = if n < 0 { len + n } else { n };
        n.clamp(0, len) as usize
    };
    let start = clamp(num(args, 1, ev, ctx));
    let end = if args.len() > 2 {
        clamp(num(args, 2, ev, ctx))
    } else {
        chars.len()
    };
    if start >= end {
        return Value::from("");
    }
    Value::String(chars[start..end].iter().collect())
}

/// `["str/pad-start", s, width, fill?]`
fn pad(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext, at_start: bool) -> Value {
    let s = text(args, 0, ev, ctx);
    let width = num(args, 1, ev, ctx);
    let fill = if args.len() > 2 {
        text(args, 2, ev, ctx)
    } else {
        " ".to_string()
    };
    let current = s.chars().count();
    if !width.is_finite() || width as usize <= current || fill.is_empty() {
        return Value::String(s);
    }
    let padding: String = fill.chars().cycle().take(width as usize - current).collect();
    Value::String(if at_start {
        padding + &s
    } else {
        s + &padding
    })
}

fn str_repeat(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let s = text(args, 0, ev, ctx);
    let n = num(args, 1, ev, ctx);
    if !n.is_finite() || n < 0.0 {
        return Value::from("");
    }
    Value::String(s.repeat(n as usize))
}

/// `["str/template", "Hi {name}", vars?]`
///
/// Placeholders (`{path}` or `{{path}}`) resolve against `vars` when given,
/// otherwise as bindings (`{entity.name}` reads `@entity.name`). Missing
/// values render empty.
fn str_template(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let template = text(args, 0, ev, ctx);
    let vars = if args.len() > 1 {
        Some(arg(args, 1, ev, ctx))
    } else {
        None
    };
    let Some(re) = PLACEHOLDER.as_ref() else {
        return Value::String(template);
    };
    let rendered = re.replace_all(&template, |caps: &Captures| {
        let path = &caps[1];
        let value = match &vars {
            Some(vars) => vars.get_path(&path.split('.').collect::<Vec<_>>()),
            None => Binding::parse(&format!("@{}", path))
                .map(|binding| ctx.resolve(&binding))
                .unwrap_or_default(),
        };
        value.to_text()
    });
    Value::String(rendered.into_owned())
}
