//! Evaluation context: the binding environment for one evaluation
//!
//! A context owns the mutable entity record, the read-only payload, the
//! lexical scope used by `let` and lambdas, and a handle to the host's effect
//! handlers. Effects record their results in the context's outcome.

use crate::effect::{EffectHandlers, EffectOutcome, NoopHandlers};
use crate::sexpr::Binding;
use crate::{Value, ValueMap};
use std::sync::Arc;

/// Binding environment and effect capability for an evaluation
#[derive(Clone)]
pub struct EvalContext {
    /// Entity record (`@entity`); effects may mutate it
    pub entity: ValueMap,
    /// Event payload (`@payload`)
    pub payload: Value,
    /// Current state name (`@state`)
    pub state: String,
    /// Orbital configuration (`@config`)
    pub config: Value,
    /// Derived values supplied by the host (`@computed`)
    pub computed: Value,
    /// Trait metadata (`@trait`)
    pub trait_info: Value,
    /// Named values visible after the reserved roots
    pub globals: ValueMap,
    /// Id of the record being processed, if any
    pub entity_id: Option<String>,
    /// Fixed clock in epoch milliseconds; wall clock when absent
    pub clock: Option<i64>,
    /// Effects produced so far
    pub outcome: EffectOutcome,
    locals: Vec<(String, Value)>,
    handlers: Arc<dyn EffectHandlers>,
    pure: bool,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new(Arc::new(NoopHandlers))
    }
}

impl EvalContext {
    /// Create a context bound to the given effect handlers
    pub fn new(handlers: Arc<dyn EffectHandlers>) -> Self {
        Self {
            entity: ValueMap::new(),
            payload: Value::object(),
            state: String::new(),
            config: Value::object(),
            computed: Value::object(),
            trait_info: Value::object(),
            globals: ValueMap::new(),
            entity_id: None,
            clock: None,
            outcome: EffectOutcome::default(),
            locals: Vec::new(),
            handlers,
            pure: false,
        }
    }

    pub fn with_entity(mut self, entity: ValueMap) -> Self {
        self.entity = entity;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn with_config(mut self, config: impl Into<Value>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_computed(mut self, computed: impl Into<Value>) -> Self {
        self.computed = computed.into();
        self
    }

    pub fn with_trait_info(mut self, info: impl Into<Value>) -> Self {
        self.trait_info = info.into();
        self
    }

    pub fn with_entity_id(mut self, id: Option<String>) -> Self {
        self.entity_id = id;
        self
    }

    /// Pin `@now` to a fixed epoch-millisecond timestamp
    pub fn with_clock(mut self, now_ms: i64) -> Self {
        self.clock = Some(now_ms);
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Effect handler capability
    pub fn handlers(&self) -> &Arc<dyn EffectHandlers> {
        &self.handlers
    }

    /// Current time in epoch milliseconds
    pub fn now(&self) -> i64 {
        self.clock
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
    }

    /// Whether effect and async operators are refused
    pub fn is_pure(&self) -> bool {
        self.pure
    }

    /// Switch pure mode, returning the previous setting
    pub fn set_pure(&mut self, pure: bool) -> bool {
        std::mem::replace(&mut self.pure, pure)
    }

    /// Push a lexical binding
    pub fn push_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.push((name.into(), value));
    }

    /// Drop the most recent `count` lexical bindings
    pub fn pop_locals(&mut self, count: usize) {
        let keep = self.locals.len().saturating_sub(count);
        self.locals.truncate(keep);
    }

    /// Look up a lexical binding (innermost first)
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Resolve a binding; missing paths yield `Undefined`
    pub fn resolve(&self, binding: &Binding) -> Value {
        if let Some(value) = self.local(&binding.root) {
            return value.get_path(&binding.path);
        }
        let root = match binding.root.as_str() {
            "entity" => {
                if binding.path.is_empty() {
                    return Value::Object(self.entity.clone());
                }
                return match self.entity.get(binding.path[0].as_str()) {
                    Some(v) => v.get_path(&binding.path[1..]),
                    None => Value::Undefined,
                };
            }
            "payload" => &self.payload,
            "config" => &self.config,
            "computed" => &self.computed,
            "trait" => &self.trait_info,
            "state" => return Value::from(self.state.as_str()).get_path(&binding.path),
            "now" => return Value::Int(self.now()).get_path(&binding.path),
            other => match self.globals.get(other) {
                Some(v) => v,
                None => {
                    tracing::warn!(binding = %binding, "Unknown binding root");
                    return Value::Undefined;
                }
            },
        };
        root.get_path(&binding.path)
    }

    /// Copy of this context for deferred work
    ///
    /// The copy shares handlers and bindings but starts with an empty outcome
    /// and pure mode off.
    pub fn detach(&self) -> EvalContext {
        let mut copy = self.clone();
        copy.outcome = EffectOutcome::default();
        copy.pure = false;
        copy
    }

    /// Take the accumulated outcome, leaving an empty one
    pub fn take_outcome(&mut self) -> EffectOutcome {
        std::mem::take(&mut self.outcome)
    }
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("entity", &self.entity)
            .field("payload", &self.payload)
            .field("state", &self.state)
            .field("locals", &self.locals)
            .field("pure", &self.pure)
            .finish_non_exhaustive()
    }
}
