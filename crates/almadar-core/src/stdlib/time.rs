//! `time/*`
//!
//! Timestamps are Unix milliseconds (UTC). String arguments are parsed as
//! RFC 3339 or `YYYY-MM-DD`. `time/now` reads the context clock, so a
//! pinned clock makes these operators deterministic.

use crate::eval::{arg, num, text, Evaluator, OpKind, OperatorTable};
use crate::{EvalContext, SExpr, Value};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt::Write;

const DEFAULT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("time/now", OpKind::Pure, |_, _, c| Value::Int(c.now()))
        .register("time/today", OpKind::Pure, |_, _, c| {
            to_datetime(c.now())
                .and_then(|dt| start_of(dt, "day"))
                .map(|dt| Value::Int(dt.timestamp_millis()))
                .unwrap_or_default()
        })
        .register("time/parse", OpKind::Pure, |a, e, c| {
            timestamp(&arg(a, 0, e, c)).map(Value::Int).unwrap_or_default()
        })
        .register("time/format", OpKind::Pure, time_format)
        .register("time/add", OpKind::Pure, time_add)
        .register("time/diff", OpKind::Pure, time_diff)
        .register("time/before", OpKind::Pure, |a, e, c| order(a, e, c, |x, y| x < y))
        .register("time/after", OpKind::Pure, |a, e, c| order(a, e, c, |x, y| x > y))
        .register("time/start-of", OpKind::Pure, time_start_of);
}

/// Milliseconds for a number or a parseable date string
pub(crate) fn timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Int(ms) => Some(*ms),
        Value::Float(ms) if ms.is_finite() => Some(ms.trunc() as i64),
        Value::String(s) => parse_text(s.trim()),
        _ => None,
    }
}

fn parse_text(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    s.parse::<i64>().ok()
}

pub(crate) fn to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Render with a strftime pattern; `None` on an invalid pattern
pub(crate) fn render(dt: &DateTime<Utc>, pattern: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", dt.format(pattern)).ok()?;
    Some(out)
}

/// Milliseconds in a fixed-length unit
fn unit_ms(unit: &str) -> Option<i64> {
    Some(match unit {
        "ms" | "millisecond" | "milliseconds" => 1,
        "s" | "second" | "seconds" => 1_000,
        "m" | "minute" | "minutes" => 60_000,
        "h" | "hour" | "hours" => 3_600_000,
        "d" | "day" | "days" => 86_400_000,
        "w" | "week" | "weeks" => 604_800_000,
        _ => return None,
    })
}

/// `["time/format", ts, pattern?]`
fn time_format(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let ts = arg(args, 0, ev, ctx);
    let pattern = if args.len() > 1 {
        text(args, 1, ev, ctx)
    } else {
        DEFAULT_FORMAT.to_string()
    };
    let Some(dt) = timestamp(&ts).and_then(to_datetime) else {
        return Value::Undefined;
    };
    match render(&dt, &pattern) {
        Some(s) => Value::String(s),
        None => {
            tracing::warn!(pattern = %pattern, "Invalid time format pattern");
            Value::Undefined
        }
    }
}

/// `["time/add", ts, amount, unit?]`; unit defaults to milliseconds
fn time_add(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let ts = timestamp(&arg(args, 0, ev, ctx));
    let amount = num(args, 1, ev, ctx);
    let unit = if args.len() > 2 {
        text(args, 2, ev, ctx)
    } else {
        "ms".to_string()
    };
    let (Some(ts), true) = (ts, amount.is_finite()) else {
        return Value::Undefined;
    };
    if let Some(ms) = unit_ms(&unit) {
        return Value::Int(ts.saturating_add((amount * ms as f64) as i64));
    }
    let months = match unit.as_str() {
        "month" | "months" => amount.trunc() as i64,
        "year" | "years" => amount.trunc() as i64 * 12,
        _ => {
            tracing::warn!(unit = %unit, "Unknown time unit");
            return Value::Undefined;
        }
    };
    let Some(dt) = to_datetime(ts) else {
        return Value::Undefined;
    };
    let shifted = match u32::try_from(months.unsigned_abs()) {
        Ok(n) if months >= 0 => dt.checked_add_months(Months::new(n)),
        Ok(n) => dt.checked_sub_months(Months::new(n)),
        Err(_) => None,
    };
    shifted
        .map(|dt| Value::Int(dt.timestamp_millis()))
        .unwrap_or_default()
}

/// `["time/diff", a, b, unit?]` → `a - b` in the unit
fn time_diff(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let a = timestamp(&arg(args, 0, ev, ctx));
    let b = timestamp(&arg(args, 1, ev, ctx));
    let unit = if args.len() > 2 {
        text(args, 2, ev, ctx)
    } else {
        "ms".to_string()
    };
    match (a, b, unit_ms(&unit)) {
        (Some(a), Some(b), Some(ms)) => Value::number((a - b) as f64 / ms as f64),
        _ => Value::Undefined,
    }
}

fn order(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext, cmp: fn(i64, i64) -> bool) -> Value {
    let a = timestamp(&arg(args, 0, ev, ctx));
    let b = timestamp(&arg(args, 1, ev, ctx));
    match (a, b) {
        (Some(a), Some(b)) => Value::Bool(cmp(a, b)),
        _ => Value::Bool(false),
    }
}

fn start_of(dt: DateTime<Utc>, unit: &str) -> Option<DateTime<Utc>> {
    let date = dt.date_naive();
    let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    match unit {
        "minute" => dt.with_second(0)?.with_nanosecond(0),
        "hour" => dt.with_minute(0)?.with_second(0)?.with_nanosecond(0),
        "day" => midnight(date),
        "week" => {
            let back = Duration::days(i64::from(date.weekday().num_days_from_monday()));
            midnight(date.checked_sub_signed(back)?)
        }
        "month" => midnight(date.with_day(1)?),
        "year" => midnight(NaiveDate::from_ymd_opt(date.year(), 1, 1)?),
        _ => None,
    }
}

/// `["time/start-of", ts, "day"|"week"|"month"|...]`
fn time_start_of(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let ts = timestamp(&arg(args, 0, ev, ctx));
    let unit = text(args, 1, ev, ctx);
    ts.and_then(to_datetime)
        .and_then(|dt| start_of(dt, &unit))
        .map(|dt| Value::Int(dt.timestamp_millis()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use crate::{EvalContext, Evaluator, SExpr, Value};
    use serde_json::json;

    /// 2024-03-14T15:09:26.535Z (a Thursday)
    const PINNED: i64 = 1_710_428_966_535;

    fn eval(json: serde_json::Value) -> Value {
        let expr = SExpr::from_json(json).unwrap();
        let mut ctx = EvalContext::default().with_clock(PINNED);
        Evaluator::new().evaluate(&expr, &mut ctx)
    }

    #[test]
    fn test_now_reads_pinned_clock() {
        assert_eq!(eval(json!(["time/now"])), Value::Int(PINNED));
        assert_eq!(eval(json!(["time/today"])), Value::Int(1_710_374_400_000));
    }

    #[test]
    fn test_parse_and_format() {
        assert_eq!(eval(json!(["time/parse", "2024-03-14"])), Value::Int(1_710_374_400_000));
        assert_eq!(
            eval(json!(["time/parse", "2024-03-14T15:09:26.535Z"])),
            Value::Int(PINNED)
        );
        assert_eq!(eval(json!(["time/parse", "not a date"])), Value::Undefined);
        assert_eq!(
            eval(json!(["time/format", "@now"])),
            Value::from("2024-03-14T15:09:26.535Z")
        );
        assert_eq!(eval(json!(["time/format", "@now", "%d/%m/%Y"])), Value::from("14/03/2024"));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval(json!(["time/add", 0, 2, "h"])), Value::Int(7_200_000));
        assert_eq!(
            eval(json!(["time/format", ["time/add", "2024-01-31", 1, "month"], "%Y-%m-%d"])),
            Value::from("2024-02-29")
        );
        assert_eq!(eval(json!(["time/diff", 90_000, 0, "m"])), Value::Float(1.5));
        assert_eq!(eval(json!(["time/diff", "2024-03-15", "2024-03-14", "d"])), Value::Int(1));
        assert_eq!(eval(json!(["time/before", "2024-01-01", "@now"])), Value::Bool(true));
        assert_eq!(eval(json!(["time/after", "2024-01-01", "@now"])), Value::Bool(false));
    }

    #[test]
    fn test_start_of() {
        let day = |unit: &str| {
            let ts = eval(json!(["time/start-of", "@now", unit]));
            eval(json!(["time/format", ts.to_json(), "%Y-%m-%d %H:%M"]))
        };
        assert_eq!(day("hour"), Value::from("2024-03-14 15:00"));
        assert_eq!(day("week"), Value::from("2024-03-11 00:00"));
        assert_eq!(day("month"), Value::from("2024-03-01 00:00"));
        assert_eq!(day("year"), Value::from("2024-01-01 00:00"));
        assert_eq!(eval(json!(["time/start-of", "@now", "fortnight"])), Value::Undefined);
    }
}
