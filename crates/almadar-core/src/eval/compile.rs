//! Compiled-closure cache
//!
//! `compile` turns an expression tree into nested closures with every
//! operator lookup resolved up front. Each closure node goes through the same
//! dispatch path as the interpreter, so a compiled expression always returns
//! exactly what `evaluate` returns.

use super::{Evaluator, OperatorTable};
use crate::{EvalContext, SExpr, Value, ValueMap};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A compiled expression body
pub type CompiledFn = Arc<dyn Fn(&Evaluator, &mut EvalContext) -> Value + Send + Sync>;

/// A compiled expression bound to the evaluator that produced it
#[derive(Clone)]
pub struct Compiled {
    evaluator: Evaluator,
    func: CompiledFn,
}

impl Compiled {
    pub(crate) fn new(evaluator: Evaluator, func: CompiledFn) -> Self {
        Self { evaluator, func }
    }

    /// Run against a context
    pub fn run(&self, ctx: &mut EvalContext) -> Value {
        (self.func)(&self.evaluator, ctx)
    }

    /// Run in pure mode and apply truthiness
    pub fn run_guard(&self, ctx: &mut EvalContext) -> bool {
        let previous = ctx.set_pure(true);
        let result = self.run(ctx);
        ctx.set_pure(previous);
        result.is_truthy()
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Size-bounded cache keyed by canonical expression structure
///
/// When full, the oldest inserted entry is evicted.
pub struct CompiledCache {
    capacity: usize,
    entries: RwLock<IndexMap<String, CompiledFn>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompiledCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(IndexMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &str) -> Option<CompiledFn> {
        let found = self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).cloned());
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, key: String, func: CompiledFn) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            if entries.contains_key(&key) {
                return;
            }
            while entries.len() >= self.capacity {
                entries.shift_remove_index(0);
            }
            entries.insert(key, func);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Build the closure tree for an expression
pub(crate) fn build(expr: &SExpr, ops: &OperatorTable) -> CompiledFn {
    match expr {
        SExpr::Literal(value) => {
            let value = value.clone();
            Arc::new(move |_: &Evaluator, _: &mut EvalContext| value.clone())
        }
        SExpr::Binding(binding) => {
            let binding = binding.clone();
            Arc::new(move |_: &Evaluator, ctx: &mut EvalContext| ctx.resolve(&binding))
        }
        SExpr::List(items) => {
            let children: Vec<CompiledFn> = items.iter().map(|e| build(e, ops)).collect();
            Arc::new(move |ev: &Evaluator, ctx: &mut EvalContext| {
                Value::Array(children.iter().map(|c| c(ev, ctx)).collect())
            })
        }
        SExpr::Record(fields) => {
            let children: Vec<(String, CompiledFn)> = fields
                .iter()
                .map(|(k, e)| (k.clone(), build(e, ops)))
                .collect();
            Arc::new(move |ev: &Evaluator, ctx: &mut EvalContext| {
                let mut map = ValueMap::with_capacity(children.len());
                for (key, child) in &children {
                    let value = child(ev, ctx);
                    map.insert(key.clone(), value);
                }
                Value::Object(map)
            })
        }
        SExpr::Call { op, args } => {
            let operator = ops.get(op).copied();
            let op = op.clone();
            let args = args.clone();
            Arc::new(move |ev: &Evaluator, ctx: &mut EvalContext| {
                ev.dispatch(&op, operator.as_ref(), &args, ctx)
            })
        }
    }
}
