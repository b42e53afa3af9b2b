//! Effect operators
//!
//! State mutation (`set`, `increment`, ...) applies to the context directly.
//! Everything else goes through the injected [`EffectHandlers`]; failures are
//! caught here and recorded as failed effect results, never propagated.
//!
//! [`EffectHandlers`]: crate::effect::EffectHandlers

use super::{arg, text, Evaluator, OpKind, OperatorTable};
use crate::effect::{EffectResult, EmittedEvent, PersistAction, ServiceCall};
use crate::sexpr::Binding;
use crate::slot::RenderRequest;
use crate::value::set_path;
use crate::{EffectError, EvalContext, SExpr, Value, ValueMap};

pub(crate) fn register(table: &mut OperatorTable) {
    table
        .register("set", OpKind::Effect, op_set)
        .register("set-dynamic", OpKind::Effect, op_set_dynamic)
        .register("increment", OpKind::Effect, op_increment)
        .register("decrement", OpKind::Effect, op_decrement)
        .register("emit", OpKind::Effect, op_emit)
        .register("persist", OpKind::Effect, op_persist)
        .register("fetch", OpKind::Effect, op_fetch)
        .register("navigate", OpKind::Effect, op_navigate)
        .register("notify", OpKind::Effect, op_notify)
        .register("spawn", OpKind::Effect, op_spawn)
        .register("despawn", OpKind::Effect, op_despawn)
        .register("call-service", OpKind::Effect, op_call_service)
        .register("render-ui", OpKind::Effect, op_render_ui);
}

/// Turn `entity.a.b`, `@entity.a.b` or `["entity", "a"]` into a binding
fn binding_from_value(value: &Value) -> Option<Binding> {
    match value {
        Value::String(s) => Binding::parse(&format!("@{}", s.trim_start_matches('@'))),
        Value::Array(segments) => {
            let joined: Vec<String> = segments.iter().map(Value::to_text).collect();
            Binding::parse(&format!("@{}", joined.join(".")))
        }
        _ => None,
    }
}

/// The assignment target of `set`, `increment` and `decrement`
fn static_target(expr: Option<&SExpr>) -> Option<Binding> {
    match expr? {
        SExpr::Binding(binding) => Some(binding.clone()),
        SExpr::Literal(value) => binding_from_value(value),
        _ => None,
    }
}

/// Write `value` at `target`; the entity and named globals are writable
fn assign(ctx: &mut EvalContext, target: &Binding, value: Value) -> bool {
    match target.root.as_str() {
        "entity" => {
            if target.path.is_empty() {
                return match value {
                    Value::Object(map) => {
                        ctx.entity = map;
                        true
                    }
                    _ => false,
                };
            }
            set_path(&mut ctx.entity, &target.path, value)
        }
        "" => false,
        root if target.is_reserved() => {
            tracing::warn!(target = %target, root = %root, "Binding root is read-only");
            false
        }
        root => {
            let mut path = vec![root.to_string()];
            path.extend(target.path.iter().cloned());
            set_path(&mut ctx.globals, &path, value)
        }
    }
}

fn set_value(target: Option<Binding>, value: Value, ctx: &mut EvalContext) -> Value {
    let Some(target) = target else {
        tracing::warn!("Assignment without a valid target");
        return Value::Undefined;
    };
    if assign(ctx, &target, value.clone()) {
        value
    } else {
        Value::Undefined
    }
}

/// `["set", "@entity.field", value]`
fn op_set(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let value = arg(args, 1, ev, ctx);
    set_value(static_target(args.first()), value, ctx)
}

/// `["set-dynamic", pathExpr, value]`: the path is computed
fn op_set_dynamic(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let path = arg(args, 0, ev, ctx);
    let value = arg(args, 1, ev, ctx);
    set_value(binding_from_value(&path), value, ctx)
}

fn adjust(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext, sign: f64) -> Value {
    let Some(target) = static_target(args.first()) else {
        tracing::warn!("Increment without a valid target");
        return Value::Undefined;
    };
    let by = if args.len() > 1 {
        arg(args, 1, ev, ctx).to_number()
    } else {
        1.0
    };
    let current = ctx.resolve(&target);
    let base = if current.is_nullish() {
        0.0
    } else {
        current.to_number()
    };
    set_value(Some(target), Value::number(base + sign * by), ctx)
}

/// `["increment", "@entity.count", by?]`
fn op_increment(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    adjust(args, ev, ctx, 1.0)
}

/// `["decrement", "@entity.count", by?]`
fn op_decrement(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    adjust(args, ev, ctx, -1.0)
}

/// `["emit", "EVENT", payload?]`: queued on the context, not dispatched
fn op_emit(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let event = text(args, 0, ev, ctx);
    if event.is_empty() {
        tracing::warn!("emit without an event name");
        return Value::Undefined;
    }
    let payload = match arg(args, 1, ev, ctx) {
        Value::Undefined => Value::object(),
        other => other,
    };
    ctx.outcome.client_effects.push(Value::Array(vec![
        Value::from("emit"),
        Value::from(event.as_str()),
        payload.clone(),
    ]));
    ctx.outcome.emitted.push(EmittedEvent { event, payload });
    Value::Bool(true)
}

/// Resolve the record id an update or delete addresses
fn record_id(data: &Value, ctx: &EvalContext) -> Option<String> {
    let from_value = |v: &Value| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    };
    data.as_object()
        .and_then(|map| map.get("id"))
        .and_then(from_value)
        .or_else(|| from_value(data))
        .or_else(|| ctx.entity_id.clone())
        .or_else(|| ctx.entity.get("id").and_then(from_value))
}

/// `["persist", "create"|"update"|"delete", "Type", data?]`
fn op_persist(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let action_name = text(args, 0, ev, ctx);
    let entity_type = text(args, 1, ev, ctx);
    let data = if args.len() > 2 {
        arg(args, 2, ev, ctx)
    } else {
        Value::Object(ctx.entity.clone())
    };

    let failed = |error: EffectError| {
        EffectResult::failed("persist", error)
            .with_action(action_name.as_str())
            .with_entity_type(entity_type.as_str())
    };

    let Some(action) = PersistAction::parse(&action_name) else {
        let result = failed(EffectError::new(
            "INVALID_ACTION",
            format!("Unknown persist action '{}'", action_name),
        ));
        ctx.outcome.effect_results.push(result);
        return Value::Undefined;
    };

    let id = match action {
        PersistAction::Create => None,
        PersistAction::Update | PersistAction::Delete => match record_id(&data, ctx) {
            Some(id) => Some(id),
            None => {
                let result = failed(EffectError::new(
                    "VALIDATION_ERROR",
                    format!("persist {} requires an entity id", action),
                ));
                ctx.outcome.effect_results.push(result);
                return Value::Undefined;
            }
        },
    };

    let handlers = ctx.handlers().clone();
    match handlers.persist(action, &entity_type, id.as_deref(), &data) {
        Ok(record) => {
            ctx.outcome.effect_results.push(
                EffectResult::ok("persist", record.clone())
                    .with_action(action.as_str())
                    .with_entity_type(entity_type.as_str()),
            );
            record
        }
        Err(err) => {
            tracing::warn!(action = %action, entity_type = %entity_type, error = %err, "persist failed");
            ctx.outcome.effect_results.push(failed(err));
            Value::Undefined
        }
    }
}

/// `["fetch", "Type", {"id": ..}]` or `["fetch", "Type", {"filter": expr}]`
///
/// The filter is evaluated per record in pure mode with `@entity` bound to
/// the record. Results land in the outcome's `data` under the type name.
fn op_fetch(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let entity_type = text(args, 0, ev, ctx);
    let (id_expr, filter) = match args.get(1) {
        Some(SExpr::Record(fields)) => (
            fields.iter().find(|(k, _)| k == "id").map(|(_, e)| e.clone()),
            fields.iter().find(|(k, _)| k == "filter").map(|(_, e)| e.clone()),
        ),
        Some(SExpr::Literal(Value::Object(map))) => (
            map.get("id").cloned().map(SExpr::Literal),
            map.get("filter").and_then(|v| SExpr::parse(v).ok()),
        ),
        _ => (None, None),
    };

    let handlers = ctx.handlers().clone();
    let result = match id_expr {
        Some(expr) => {
            let id = ev.evaluate(&expr, ctx).to_text();
            handlers.fetch_one(&entity_type, &id)
        }
        None => handlers.fetch_all(&entity_type).map(|records| {
            let Some(filter) = filter else {
                return Value::Array(records);
            };
            let saved = std::mem::take(&mut ctx.entity);
            let kept = records
                .into_iter()
                .filter(|record| {
                    ctx.entity = record.as_object().cloned().unwrap_or_default();
                    ev.evaluate_guard(&filter, ctx)
                })
                .collect();
            ctx.entity = saved;
            Value::Array(kept)
        }),
    };

    match result {
        Ok(data) => {
            ctx.outcome.data.insert(entity_type.clone(), data.clone());
            ctx.outcome.effect_results.push(
                EffectResult::ok("fetch", data.clone()).with_entity_type(entity_type.as_str()),
            );
            data
        }
        Err(err) => {
            tracing::warn!(entity_type = %entity_type, error = %err, "fetch failed");
            ctx.outcome
                .effect_results
                .push(EffectResult::failed("fetch", err).with_entity_type(entity_type.as_str()));
            Value::Undefined
        }
    }
}

/// `["navigate", "/path", params?]`
fn op_navigate(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let path = text(args, 0, ev, ctx);
    let params = match arg(args, 1, ev, ctx) {
        Value::Undefined => Value::object(),
        other => other,
    };
    ctx.handlers().navigate(&path, &params);
    ctx.outcome.client_effects.push(Value::Array(vec![
        Value::from("navigate"),
        Value::from(path),
        params,
    ]));
    Value::Bool(true)
}

/// `["notify", message, kind?]`; kind defaults to `info`
fn op_notify(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let message = text(args, 0, ev, ctx);
    let kind = match arg(args, 1, ev, ctx) {
        Value::Undefined | Value::Null => "info".to_string(),
        other => other.to_text(),
    };
    ctx.handlers().notify(&message, &kind);
    ctx.outcome.client_effects.push(Value::Array(vec![
        Value::from("notify"),
        Value::from(message),
        Value::from(kind),
    ]));
    Value::Bool(true)
}

/// `["spawn", "Type", fields?]`; returns the new entity id
fn op_spawn(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let entity_type = text(args, 0, ev, ctx);
    let fields = match arg(args, 1, ev, ctx) {
        Value::Object(map) => map,
        _ => ValueMap::new(),
    };
    let handlers = ctx.handlers().clone();
    match handlers.spawn(&entity_type, fields) {
        Ok(id) => {
            ctx.outcome.effect_results.push(
                EffectResult::ok("spawn", Value::from(id.as_str()))
                    .with_entity_type(entity_type.as_str()),
            );
            Value::from(id)
        }
        Err(err) => {
            ctx.outcome
                .effect_results
                .push(EffectResult::failed("spawn", err).with_entity_type(entity_type.as_str()));
            Value::Undefined
        }
    }
}

/// `["despawn", id]`
fn op_despawn(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let id = text(args, 0, ev, ctx);
    let handlers = ctx.handlers().clone();
    match handlers.despawn(&id) {
        Ok(removed) => {
            ctx.outcome
                .effect_results
                .push(EffectResult::ok("despawn", Value::from(id.as_str())));
            Value::Bool(removed)
        }
        Err(err) => {
            ctx.outcome
                .effect_results
                .push(EffectResult::failed("despawn", err));
            Value::Undefined
        }
    }
}

/// `["call-service", "service", "action", params?, {"onSuccess": .., "onError": ..}?]`
fn op_call_service(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let service = text(args, 0, ev, ctx);
    let action = text(args, 1, ev, ctx);
    let params = match arg(args, 2, ev, ctx) {
        Value::Undefined => Value::object(),
        other => other,
    };
    let events = arg(args, 3, ev, ctx);
    let event_name = |key: &str| match events.get_path(&[key]) {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    };
    let call = ServiceCall {
        service: service.clone(),
        action: action.clone(),
        params,
        on_success: event_name("onSuccess"),
        on_error: event_name("onError"),
    };

    let mut info = ValueMap::new();
    info.insert("service".into(), Value::from(service.as_str()));
    info.insert("action".into(), Value::from(action.as_str()));

    let handlers = ctx.handlers().clone();
    let result = match handlers.call_service(call) {
        Ok(()) => EffectResult::ok("call-service", Value::Object(info)),
        Err(err) => {
            tracing::warn!(service = %service, action = %action, error = %err, "call-service failed");
            let mut result = EffectResult::failed("call-service", err);
            result.data = Value::Object(info);
            result
        }
    };
    let success = result.success;
    ctx.outcome
        .effect_results
        .push(result.with_action(action.as_str()));
    Value::Bool(success)
}

/// `["render-ui", "slot", "Pattern"|null, props?, options?]`
///
/// Options: `priority`, `animation`, `id`, `autoDismissMs`, `onDismiss`.
fn op_render_ui(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    let target = text(args, 0, ev, ctx);
    let pattern = arg(args, 1, ev, ctx);
    let props = match arg(args, 2, ev, ctx) {
        Value::Undefined => Value::object(),
        other => other,
    };
    let options = arg(args, 3, ev, ctx);

    let opt_text = |key: &str| match options.get_path(&[key]) {
        Value::Undefined | Value::Null => None,
        other => Some(other.to_text()),
    };
    let priority = options.get_path(&["priority"]).to_number();
    let auto_dismiss = options.get_path(&["autoDismissMs"]).to_number();
    let request = RenderRequest {
        target: target.clone(),
        pattern: (!pattern.is_nullish()).then(|| pattern.to_text()),
        props: props.clone(),
        priority: if priority.is_finite() { priority as i64 } else { 0 },
        animation: opt_text("animation"),
        id: opt_text("id"),
        source_trait: ctx.trait_info.get_path(&["name"]).as_str().map(str::to_string),
        auto_dismiss_ms: (auto_dismiss.is_finite() && auto_dismiss > 0.0).then_some(auto_dismiss as u64),
        on_dismiss: opt_text("onDismiss"),
    };

    let mut issued = vec![Value::from("render-ui"), Value::from(target.as_str()), pattern, props];
    if !options.is_undefined() {
        issued.push(options.clone());
    }
    ctx.outcome.client_effects.push(Value::Array(issued));

    let handlers = ctx.handlers().clone();
    match handlers.render_ui(request) {
        Ok(()) => Value::Bool(true),
        Err(err) if err.code == "UNSUPPORTED_EFFECT" => Value::Bool(true),
        Err(err) => {
            ctx.outcome
                .effect_results
                .push(EffectResult::failed("render-ui", err).with_entity_type(target.as_str()));
            Value::Bool(false)
        }
    }
}
