//! `async/*`: effects deferred through the host scheduler
//!
//! Each operator returns immediately with a task id. Deferred effects run on
//! a detached copy of the calling context; events they emit are published
//! through [`EffectHandlers::emit`](crate::effect::EffectHandlers::emit)
//! once the work finishes, and entity writes stay local to the copy.

use crate::eval::{arg, num, text, Evaluator, OpKind, OperatorTable};
use crate::scheduler::{Scheduler, TaskId};
use crate::{EvalContext, SExpr, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub(super) fn register(table: &mut OperatorTable) {
    table
        .register("async/delay", OpKind::Async, async_delay)
        .register("async/timeout", OpKind::Async, async_delay)
        .register("async/debounce", OpKind::Async, async_debounce)
        .register("async/throttle", OpKind::Async, async_throttle)
        .register("async/retry", OpKind::Async, async_retry)
        .register("async/race", OpKind::Async, async_race)
        .register("async/all", OpKind::Async, async_all)
        .register("async/sequence", OpKind::Async, async_sequence)
        .register("async/cancel", OpKind::Async, async_cancel);
}

fn scheduler(ctx: &EvalContext, op: &str) -> Option<Arc<dyn Scheduler>> {
    let scheduler = ctx.handlers().scheduler();
    if scheduler.is_none() {
        tracing::warn!(operator = %op, "No scheduler available for deferred effect");
    }
    scheduler
}

fn millis(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext) -> Duration {
    let ms = num(args, i, ev, ctx);
    if ms.is_finite() && ms > 0.0 {
        Duration::from_millis(ms as u64)
    } else {
        Duration::ZERO
    }
}

fn task_value(id: TaskId) -> Value {
    Value::Int(i64::try_from(id).unwrap_or(i64::MAX))
}

/// Publish what a deferred run emitted
fn flush(ctx: &mut EvalContext) {
    let outcome = ctx.take_outcome();
    for event in &outcome.emitted {
        ctx.handlers().emit(&event.event, &event.payload);
    }
    if !outcome.client_effects.is_empty() {
        tracing::debug!(
            count = outcome.client_effects.len(),
            "Deferred client effects have no response to join"
        );
    }
}

/// Evaluate effects in order, returning the last value
fn run(ev: &Evaluator, ctx: &mut EvalContext, effects: &[SExpr]) -> Value {
    let mut last = Value::Undefined;
    for effect in effects {
        last = ev.execute_effect(effect, ctx);
    }
    last
}

/// Run `effects` on a detached context after `delay`
fn defer(
    scheduler: &dyn Scheduler,
    delay: Duration,
    ev: &Evaluator,
    ctx: &EvalContext,
    effects: Vec<SExpr>,
) -> TaskId {
    let ev = ev.clone();
    let mut detached = ctx.detach();
    scheduler.schedule(
        delay,
        Box::new(move || {
            run(&ev, &mut detached, &effects);
            flush(&mut detached);
        }),
    )
}

/// `["async/delay", ms, effect...]`
fn async_delay(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/delay") else {
        return Value::Undefined;
    };
    let delay = millis(args, 0, ev, ctx);
    let effects = args.get(1..).unwrap_or_default().to_vec();
    task_value(defer(scheduler.as_ref(), delay, ev, ctx, effects))
}

/// `["async/debounce", key, ms, effect...]`
///
/// A new call with the same key cancels the pending one, so only the last
/// call in a burst runs.
fn async_debounce(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/debounce") else {
        return Value::Undefined;
    };
    let key = text(args, 0, ev, ctx);
    let delay = millis(args, 1, ev, ctx);
    let effects = args.get(2..).unwrap_or_default().to_vec();
    let generation = ev.shared.generation.fetch_add(1, Ordering::Relaxed);

    let Ok(mut pending) = ev.shared.debounce.lock() else {
        return Value::Undefined;
    };
    if let Some((_, previous)) = pending.remove(&key) {
        scheduler.cancel(previous);
    }
    let task_ev = ev.clone();
    let task_key = key.clone();
    let mut detached = ctx.detach();
    let id = scheduler.schedule(
        delay,
        Box::new(move || {
            let current = match task_ev.shared.debounce.lock() {
                Ok(mut pending) => match pending.get(&task_key) {
                    Some((g, _)) if *g == generation => pending.remove(&task_key).is_some(),
                    _ => false,
                },
                Err(_) => false,
            };
            if current {
                run(&task_ev, &mut detached, &effects);
                flush(&mut detached);
            }
        }),
    );
    pending.insert(key, (generation, id));
    task_value(id)
}

/// `["async/throttle", key, ms, effect...]`
///
/// Runs the effects now, in the calling context, unless a window for `key`
/// is open; the window closes after `ms`. Returns false when throttled.
fn async_throttle(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/throttle") else {
        return Value::Undefined;
    };
    let key = text(args, 0, ev, ctx);
    let window = millis(args, 1, ev, ctx);
    let opened = match ev.shared.throttle.lock() {
        Ok(mut open) => open.insert(key.clone()),
        Err(_) => false,
    };
    if !opened {
        tracing::debug!(key = %key, "Throttled");
        return Value::Bool(false);
    }
    let shared = Arc::clone(&ev.shared);
    scheduler.schedule(
        window,
        Box::new(move || {
            if let Ok(mut open) = shared.throttle.lock() {
                open.remove(&key);
            }
        }),
    );
    run(ev, ctx, args.get(2..).unwrap_or_default());
    Value::Bool(true)
}

fn attempt(
    scheduler: Arc<dyn Scheduler>,
    ev: Evaluator,
    base: EvalContext,
    effect: SExpr,
    remaining: u32,
    delay: Duration,
) {
    let mut ctx = base.detach();
    let succeeded = ev.execute_effect(&effect, &mut ctx).is_truthy();
    flush(&mut ctx);
    if succeeded {
        return;
    }
    if remaining <= 1 {
        tracing::warn!(effect = %effect, "Retry attempts exhausted");
        return;
    }
    let next = Arc::clone(&scheduler);
    scheduler.schedule(
        delay,
        Box::new(move || attempt(next, ev, base, effect, remaining - 1, delay)),
    );
}

/// `["async/retry", attempts, delayMs, effect]`
///
/// Reruns `effect` after `delayMs` while it yields a falsy value. Events
/// from every attempt are published.
fn async_retry(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/retry") else {
        return Value::Undefined;
    };
    let attempts = num(args, 0, ev, ctx);
    let attempts = if attempts.is_finite() && attempts >= 1.0 {
        attempts.min(f64::from(u32::MAX)) as u32
    } else {
        1
    };
    let delay = millis(args, 1, ev, ctx);
    let Some(effect) = args.get(2).cloned() else {
        return Value::Undefined;
    };
    let next = Arc::clone(&scheduler);
    let task_ev = ev.clone();
    let base = ctx.detach();
    let id = scheduler.schedule(
        Duration::ZERO,
        Box::new(move || attempt(next, task_ev, base, effect, attempts, delay)),
    );
    task_value(id)
}

/// `["async/race", branch...]`: the first branch with a defined result wins
fn async_race(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/race") else {
        return Value::Undefined;
    };
    let task_ev = ev.clone();
    let base = ctx.detach();
    let branches = args.to_vec();
    let id = scheduler.schedule(
        Duration::ZERO,
        Box::new(move || {
            for branch in &branches {
                let mut ctx = base.detach();
                if !task_ev.execute_effect(branch, &mut ctx).is_undefined() {
                    flush(&mut ctx);
                    return;
                }
            }
        }),
    );
    task_value(id)
}

/// `["async/all", branch...]`: every branch on its own copy of the context
fn async_all(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/all") else {
        return Value::Undefined;
    };
    let task_ev = ev.clone();
    let base = ctx.detach();
    let branches = args.to_vec();
    let id = scheduler.schedule(
        Duration::ZERO,
        Box::new(move || {
            for branch in &branches {
                let mut ctx = base.detach();
                task_ev.execute_effect(branch, &mut ctx);
                flush(&mut ctx);
            }
        }),
    );
    task_value(id)
}

/// `["async/sequence", effect...]`: in order, sharing one context
fn async_sequence(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/sequence") else {
        return Value::Undefined;
    };
    task_value(defer(scheduler.as_ref(), Duration::ZERO, ev, ctx, args.to_vec()))
}

/// `["async/cancel", taskId]`
fn async_cancel(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let Some(scheduler) = scheduler(ctx, "async/cancel") else {
        return Value::Bool(false);
    };
    match arg(args, 0, ev, ctx).as_int().and_then(|id| u64::try_from(id).ok()) {
        Some(id) => Value::Bool(scheduler.cancel(id)),
        None => Value::Bool(false),
    }
}

#[cfg(test)]
mod tests {
    use crate::effect::EffectHandlers;
    use crate::scheduler::{ManualScheduler, Scheduler};
    use crate::{EvalContext, Evaluator, SExpr, Value, ValueMap};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Host {
        scheduler: Arc<ManualScheduler>,
        published: Mutex<Vec<(String, Value)>>,
    }

    impl Host {
        fn events(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(e, _)| e.clone())
                .collect()
        }
    }

    impl EffectHandlers for Host {
        fn emit(&self, event: &str, payload: &Value) {
            self.published
                .lock()
                .unwrap()
                .push((event.to_string(), payload.clone()));
        }

        fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
            Some(self.scheduler.clone())
        }
    }

    fn setup() -> (Arc<Host>, Evaluator, EvalContext) {
        let host = Arc::new(Host::default());
        let mut entity = ValueMap::new();
        entity.insert("count".into(), Value::Int(0));
        let ctx = EvalContext::new(host.clone()).with_entity(entity);
        (host, Evaluator::new(), ctx)
    }

    fn run(ev: &Evaluator, ctx: &mut EvalContext, json: serde_json::Value) -> Value {
        let expr = SExpr::from_json(json).unwrap();
        ev.execute_effect(&expr, ctx)
    }

    #[test]
    fn test_delay_publishes_after_clock_moves() {
        let (host, ev, mut ctx) = setup();
        let id = run(&ev, &mut ctx, json!(["async/delay", 100, ["emit", "LATER", {"n": 1}]]));
        assert!(id.as_int().is_some());
        assert!(ctx.take_outcome().emitted.is_empty());

        host.scheduler.advance(Duration::from_millis(99));
        assert!(host.events().is_empty());
        host.scheduler.advance(Duration::from_millis(1));
        assert_eq!(host.events(), vec!["LATER"]);
    }

    #[test]
    fn test_deferred_writes_stay_detached() {
        let (host, ev, mut ctx) = setup();
        run(&ev, &mut ctx, json!(["async/delay", 0, ["set", "@entity.count", 5], ["emit", "SEEN", "@entity.count"]]));
        host.scheduler.run_due();
        assert_eq!(ctx.entity["count"], Value::Int(0));
        assert_eq!(host.published.lock().unwrap()[0].1, Value::Int(5));
    }

    #[test]
    fn test_cancel() {
        let (host, ev, mut ctx) = setup();
        let id = run(&ev, &mut ctx, json!(["async/timeout", 50, ["emit", "TIMEOUT"]]));
        let cancelled = run(&ev, &mut ctx, json!(["async/cancel", id.to_json()]));
        assert_eq!(cancelled, Value::Bool(true));
        host.scheduler.advance(Duration::from_millis(100));
        assert!(host.events().is_empty());
        assert_eq!(run(&ev, &mut ctx, json!(["async/cancel", id.to_json()])), Value::Bool(false));
    }

    #[test]
    fn test_debounce_keeps_last_call() {
        let (host, ev, mut ctx) = setup();
        for n in 0..3 {
            run(&ev, &mut ctx, json!(["async/debounce", "search", 100, ["emit", "SEARCH", {"n": n}]]));
            host.scheduler.advance(Duration::from_millis(50));
        }
        assert_eq!(host.scheduler.pending(), 1);
        host.scheduler.advance(Duration::from_millis(100));
        let published = host.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.get_path(&["n"]), Value::Int(2));
    }

    #[test]
    fn test_throttle_drops_calls_inside_window() {
        let (host, ev, mut ctx) = setup();
        let throttled = json!(["async/throttle", "save", 100, ["emit", "SAVE"]]);
        assert_eq!(run(&ev, &mut ctx, throttled.clone()), Value::Bool(true));
        assert_eq!(run(&ev, &mut ctx, throttled.clone()), Value::Bool(false));
        host.scheduler.advance(Duration::from_millis(100));
        assert_eq!(run(&ev, &mut ctx, throttled), Value::Bool(true));
        let emitted: Vec<String> = ctx.take_outcome().emitted.into_iter().map(|e| e.event).collect();
        assert_eq!(emitted, vec!["SAVE", "SAVE"]);
    }

    #[test]
    fn test_retry_until_truthy() {
        let (host, ev, mut ctx) = setup();
        run(&ev, &mut ctx, json!(["async/retry", 3, 10, ["do", ["emit", "TRY"], false]]));
        host.scheduler.advance(Duration::from_millis(100));
        assert_eq!(host.events(), vec!["TRY", "TRY", "TRY"]);

        host.published.lock().unwrap().clear();
        run(&ev, &mut ctx, json!(["async/retry", 5, 10, ["do", ["emit", "OK"], true]]));
        host.scheduler.advance(Duration::from_millis(100));
        assert_eq!(host.events(), vec!["OK"]);
    }

    #[test]
    fn test_race_all_sequence() {
        let (host, ev, mut ctx) = setup();
        run(&ev, &mut ctx, json!(["async/race", "@payload.nothing", ["do", ["emit", "B"], 1], ["emit", "C"]]));
        host.scheduler.run_due();
        assert_eq!(host.events(), vec!["B"]);

        host.published.lock().unwrap().clear();
        run(&ev, &mut ctx, json!(["async/all", ["emit", "X"], ["emit", "Y"]]));
        host.scheduler.run_due();
        assert_eq!(host.events(), vec!["X", "Y"]);

        host.published.lock().unwrap().clear();
        run(&ev, &mut ctx, json!(["async/sequence", ["increment", "@entity.count"], ["emit", "N", "@entity.count"]]));
        host.scheduler.run_due();
        assert_eq!(host.published.lock().unwrap()[0].1, Value::Int(1));
    }

    #[test]
    fn test_without_scheduler_is_a_no_op() {
        let ev = Evaluator::new();
        let mut ctx = EvalContext::default();
        assert_eq!(run(&ev, &mut ctx, json!(["async/delay", 10, ["emit", "X"]])), Value::Undefined);
        assert_eq!(run(&ev, &mut ctx, json!(["async/cancel", 1])), Value::Bool(false));
    }

    #[test]
    fn test_guards_refuse_async() {
        let (_, ev, mut ctx) = setup();
        let expr = SExpr::from_json(json!(["async/delay", 0, ["emit", "X"]])).unwrap();
        assert!(!ev.evaluate_guard(&expr, &mut ctx));
        assert_eq!(ev.impure_operator(&expr), Some("async/delay"));
    }
}
