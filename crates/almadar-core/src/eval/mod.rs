//! S-expression evaluator
//!
//! Operators are looked up by name in an [`OperatorTable`] of uniform
//! handlers. Handlers receive their arguments unevaluated, so control
//! operators decide what to evaluate and everything else evaluates eagerly
//! through the helpers in this module.
//!
//! Evaluation never fails: unknown operators and bad bindings are logged and
//! yield `Value::Undefined`.

mod arith;
mod collection;
mod compare;
mod compile;
mod effects;
mod logic;
mod pattern;

pub use compile::{CacheStats, Compiled, CompiledCache};
pub use pattern::PatternCache;

use crate::config::RuntimeConfig;
use crate::rng::ExprRng;
use crate::scheduler::TaskId;
use crate::{EvalContext, SExpr, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

/// Uniform operator handler
pub type OpHandler = fn(&[SExpr], &Evaluator, &mut EvalContext) -> Value;

/// Purity class of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// No side effects; allowed in guards
    Pure,
    /// Mutates the context or calls effect handlers
    Effect,
    /// Schedules deferred work
    Async,
}

/// A registered operator
#[derive(Clone, Copy)]
pub struct Operator {
    pub kind: OpKind,
    pub handler: OpHandler,
}

/// Name to handler table
#[derive(Clone, Default)]
pub struct OperatorTable {
    ops: HashMap<String, Operator>,
}

impl OperatorTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The full built-in catalog
    pub fn standard() -> Self {
        let mut table = Self::new();
        arith::register(&mut table);
        compare::register(&mut table);
        logic::register(&mut table);
        collection::register(&mut table);
        effects::register(&mut table);
        crate::stdlib::register(&mut table);
        table
    }

    /// Register (or replace) an operator
    pub fn register(&mut self, name: &str, kind: OpKind, handler: OpHandler) -> &mut Self {
        self.ops
            .insert(name.to_string(), Operator { kind, handler });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<OpKind> {
        self.ops.get(name).map(|op| op.kind)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// State shared by every clone of an evaluator
pub(crate) struct Shared {
    pub(crate) rng: Mutex<ExprRng>,
    /// Pending debounced task per key, tagged with a generation
    pub(crate) debounce: Mutex<HashMap<String, (u64, TaskId)>>,
    /// Keys whose throttle window is open
    pub(crate) throttle: Mutex<HashSet<String>>,
    pub(crate) generation: AtomicU64,
}

/// Evaluates guards and effects
///
/// Cloning is cheap; clones share the operator table, the compiled and
/// regex caches, and async bookkeeping.
#[derive(Clone)]
pub struct Evaluator {
    ops: Arc<OperatorTable>,
    cache: Arc<CompiledCache>,
    patterns: Arc<PatternCache>,
    pub(crate) shared: Arc<Shared>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Evaluator with the standard catalog and default configuration
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self::with_operators(OperatorTable::standard(), config)
    }

    /// Evaluator over a custom operator table
    pub fn with_operators(ops: OperatorTable, config: &RuntimeConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ExprRng::new(seed),
            None => ExprRng::from_clock(),
        };
        Self {
            ops: Arc::new(ops),
            cache: Arc::new(CompiledCache::new(config.cache_capacity)),
            patterns: Arc::new(PatternCache::new(config.cache_capacity)),
            shared: Arc::new(Shared {
                rng: Mutex::new(rng),
                debounce: Mutex::new(HashMap::new()),
                throttle: Mutex::new(HashSet::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn operators(&self) -> &OperatorTable {
        &self.ops
    }

    pub fn cache(&self) -> &CompiledCache {
        &self.cache
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    /// Evaluate an expression against a context
    pub fn evaluate(&self, expr: &SExpr, ctx: &mut EvalContext) -> Value {
        match expr {
            SExpr::Literal(value) => value.clone(),
            SExpr::Binding(binding) => ctx.resolve(binding),
            SExpr::List(items) => {
                Value::Array(items.iter().map(|e| self.evaluate(e, ctx)).collect())
            }
            SExpr::Record(fields) => {
                let mut map = crate::ValueMap::with_capacity(fields.len());
                for (key, e) in fields {
                    let value = self.evaluate(e, ctx);
                    map.insert(key.clone(), value);
                }
                Value::Object(map)
            }
            SExpr::Call { op, args } => self.dispatch(op, self.ops.get(op), args, ctx),
        }
    }

    /// Call an operator by name with unevaluated arguments
    pub fn call(&self, op: &str, args: &[SExpr], ctx: &mut EvalContext) -> Value {
        self.dispatch(op, self.ops.get(op), args, ctx)
    }

    pub(crate) fn dispatch(
        &self,
        name: &str,
        operator: Option<&Operator>,
        args: &[SExpr],
        ctx: &mut EvalContext,
    ) -> Value {
        let Some(operator) = operator else {
            tracing::warn!(operator = %name, "Unknown operator");
            return Value::Undefined;
        };
        if ctx.is_pure() && operator.kind != OpKind::Pure {
            tracing::warn!(operator = %name, "Impure operator refused in pure evaluation");
            return Value::Undefined;
        }
        (operator.handler)(args, self, ctx)
    }

    /// Evaluate in pure mode and apply truthiness
    pub fn evaluate_guard(&self, expr: &SExpr, ctx: &mut EvalContext) -> bool {
        let previous = ctx.set_pure(true);
        let result = self.evaluate(expr, ctx);
        ctx.set_pure(previous);
        result.is_truthy()
    }

    /// Run one effect expression
    pub fn execute_effect(&self, expr: &SExpr, ctx: &mut EvalContext) -> Value {
        self.evaluate(expr, ctx)
    }

    /// Run effect expressions left to right
    pub fn execute_effects(&self, exprs: &[SExpr], ctx: &mut EvalContext) {
        for expr in exprs {
            self.execute_effect(expr, ctx);
        }
    }

    /// Compile an expression into a reusable closure, memoized by structure
    pub fn compile(&self, expr: &SExpr) -> Compiled {
        let key = expr.canonical_key();
        let func = match self.cache.get(&key) {
            Some(func) => func,
            None => {
                let func = compile::build(expr, &self.ops);
                self.cache.insert(key, func.clone());
                func
            }
        };
        Compiled::new(self.clone(), func)
    }

    /// First operator in `expr` that is not pure (unknown names are ignored)
    pub fn impure_operator<'a>(&self, expr: &'a SExpr) -> Option<&'a str> {
        let mut found = None;
        expr.visit_ops(&mut |op| {
            if found.is_none() && matches!(self.ops.kind(op), Some(kind) if kind != OpKind::Pure) {
                found = Some(op);
            }
        });
        found
    }
}

/// Evaluate argument `i`, or `Undefined` when absent
pub(crate) fn arg(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext) -> Value {
    match args.get(i) {
        Some(expr) => ev.evaluate(expr, ctx),
        None => Value::Undefined,
    }
}

/// Evaluate every argument in order
pub(crate) fn eval_args(args: &[SExpr], ev: &Evaluator, ctx: &mut EvalContext) -> Vec<Value> {
    args.iter().map(|e| ev.evaluate(e, ctx)).collect()
}

/// Evaluate argument `i` as a number
pub(crate) fn num(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext) -> f64 {
    arg(args, i, ev, ctx).to_number()
}

/// Evaluate argument `i` as text
pub(crate) fn text(args: &[SExpr], i: usize, ev: &Evaluator, ctx: &mut EvalContext) -> String {
    arg(args, i, ev, ctx).to_text()
}

/// Numbers from variadic arguments; a single array argument is spread
pub(crate) fn numbers(values: Vec<Value>) -> Vec<f64> {
    let values = match values.as_slice() {
        [Value::Array(items)] => items.clone(),
        _ => values,
    };
    values.iter().map(Value::to_number).collect()
}

/// Apply a collection callback to one element
///
/// The callback is either `["fn", "name", body]`, binding the element to
/// `@name`, or a bare body that sees `@item`. Both see `@index`.
pub(crate) fn apply_lambda(
    lambda: &SExpr,
    item: Value,
    index: usize,
    ev: &Evaluator,
    ctx: &mut EvalContext,
) -> Value {
    let (name, body) = match lambda {
        SExpr::Call { op, args } if op == "fn" => {
            let name = args
                .first()
                .and_then(SExpr::as_literal_str)
                .map(|s| s.trim_start_matches('@').to_string());
            match (name, args.get(1)) {
                (Some(name), Some(body)) => (name, body),
                _ => {
                    tracing::warn!(lambda = %lambda, "Malformed lambda");
                    return Value::Undefined;
                }
            }
        }
        body => ("item".to_string(), body),
    };
    ctx.push_local("index", Value::from(index));
    ctx.push_local(name, item);
    let result = ev.evaluate(body, ctx);
    ctx.pop_locals(2);
    result
}
