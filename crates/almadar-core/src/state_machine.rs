//! Trait state machines
//!
//! A [`TraitDef`] is the declarative schema form. Building a [`TraitMachine`]
//! validates it and compiles every guard and effect once; a
//! [`TraitInstance`] pairs a machine with its current state.

use crate::eval::{Compiled, Evaluator};
use crate::{Error, EvalContext, Result, SExpr};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// A state of a trait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDef {
    pub name: String,
    #[serde(default)]
    pub is_initial: bool,
}

impl StateDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_initial: false,
        }
    }

    pub fn initial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_initial: true,
        }
    }
}

/// `from --event[guard]--> to`, running `effects` in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub from: String,
    pub to: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<SExpr>,
    #[serde(default)]
    pub effects: Vec<SExpr>,
}

impl TransitionDef {
    pub fn new(from: impl Into<String>, event: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            event: event.into(),
            guard: None,
            effects: Vec::new(),
        }
    }

    pub fn with_guard(mut self, guard: SExpr) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_effect(mut self, effect: SExpr) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Cross-orbital subscription: when `event` is emitted, dispatch `triggers`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenDef {
    pub event: String,
    pub triggers: String,
}

/// Declarative trait schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitDef {
    pub name: String,
    pub states: Vec<StateDef>,
    /// Declared events; when non-empty every transition must use one of them
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
    #[serde(default)]
    pub listens: Vec<ListenDef>,
}

impl TraitDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            events: Vec::new(),
            transitions: Vec::new(),
            listens: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: StateDef) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_transition(mut self, transition: TransitionDef) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_listener(mut self, event: impl Into<String>, triggers: impl Into<String>) -> Self {
        self.listens.push(ListenDef {
            event: event.into(),
            triggers: triggers.into(),
        });
        self
    }

    /// Check the structural rules and return the initial state
    pub fn validate(&self, evaluator: &Evaluator) -> Result<&str> {
        let context = format!("trait {}", self.name);
        if self.name.is_empty() {
            return Err(Error::construction(context, "trait name is empty"));
        }
        let mut names = HashSet::new();
        for state in &self.states {
            if !names.insert(state.name.as_str()) {
                return Err(Error::construction(
                    context,
                    format!("duplicate state '{}'", state.name),
                ));
            }
        }
        let initial: Vec<&StateDef> = self.states.iter().filter(|s| s.is_initial).collect();
        let initial = match initial.as_slice() {
            [only] => only.name.as_str(),
            [] => return Err(Error::construction(context, "no initial state")),
            _ => {
                return Err(Error::construction(
                    context,
                    format!("{} initial states, expected exactly one", initial.len()),
                ))
            }
        };
        for t in &self.transitions {
            for state in [&t.from, &t.to] {
                if !names.contains(state.as_str()) {
                    return Err(Error::construction(
                        context,
                        format!("transition {} -> {} references unknown state '{}'", t.from, t.to, state),
                    ));
                }
            }
            if !self.events.is_empty() && !self.events.contains(&t.event) {
                return Err(Error::construction(
                    context,
                    format!("transition on undeclared event '{}'", t.event),
                ));
            }
            if let Some(op) = t.guard.as_ref().and_then(|g| evaluator.impure_operator(g)) {
                return Err(Error::construction(
                    context,
                    format!("guard on {} -> {} uses impure operator '{}'", t.from, t.to, op),
                ));
            }
        }
        Ok(initial)
    }
}

/// A fired transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub event: String,
}

struct CompiledTransition {
    guard: Option<Compiled>,
    effects: Vec<Compiled>,
}

/// A validated trait with compiled guards and effects
pub struct TraitMachine {
    def: TraitDef,
    initial: String,
    compiled: Vec<CompiledTransition>,
}

impl std::fmt::Debug for TraitMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraitMachine")
            .field("name", &self.def.name)
            .field("initial", &self.initial)
            .field("transitions", &self.compiled.len())
            .finish()
    }
}

impl TraitMachine {
    /// Validate `def` and compile it; construction errors are returned here
    pub fn new(def: TraitDef, evaluator: &Evaluator) -> Result<Self> {
        let initial = def.validate(evaluator)?.to_string();
        let compiled = def
            .transitions
            .iter()
            .map(|t| CompiledTransition {
                guard: t.guard.as_ref().map(|g| evaluator.compile(g)),
                effects: t.effects.iter().map(|e| evaluator.compile(e)).collect(),
            })
            .collect();
        Ok(Self {
            def,
            initial,
            compiled,
        })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &TraitDef {
        &self.def
    }

    pub fn initial_state(&self) -> &str {
        &self.initial
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.def.states.iter().any(|s| s.name == name)
    }

    /// Events with at least one transition out of `state`
    pub fn available_events(&self, state: &str) -> Vec<&str> {
        let mut events: Vec<&str> = Vec::new();
        for t in self.def.transitions.iter().filter(|t| t.from == state) {
            if !events.contains(&t.event.as_str()) {
                events.push(&t.event);
            }
        }
        events
    }

    /// Whether any transition listens for `event`, from any state
    pub fn handles(&self, event: &str) -> bool {
        self.def.transitions.iter().any(|t| t.event == event)
    }

    /// Index of the first candidate from `state` on `event` whose guard holds
    pub fn select(&self, state: &str, event: &str, ctx: &mut EvalContext) -> Option<usize> {
        self.def
            .transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.from == state && t.event == event)
            .find(|(i, _)| match &self.compiled[*i].guard {
                Some(guard) => guard.run_guard(ctx),
                None => true,
            })
            .map(|(i, _)| i)
    }

    /// Run the effects of transition `index` in declaration order
    pub fn run_effects(&self, index: usize, ctx: &mut EvalContext) {
        if let Some(compiled) = self.compiled.get(index) {
            for effect in &compiled.effects {
                effect.run(ctx);
            }
        }
    }

    pub fn transition(&self, index: usize) -> Option<&TransitionDef> {
        self.def.transitions.get(index)
    }
}

/// A trait machine bound to a current state
#[derive(Debug, Clone)]
pub struct TraitInstance {
    machine: Arc<TraitMachine>,
    current_state: String,
}

impl TraitInstance {
    /// Instance starting in the machine's initial state
    pub fn new(machine: Arc<TraitMachine>) -> Self {
        let current_state = machine.initial_state().to_string();
        Self {
            machine,
            current_state,
        }
    }

    pub fn machine(&self) -> &Arc<TraitMachine> {
        &self.machine
    }

    pub fn name(&self) -> &str {
        self.machine.name()
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    /// Force the current state (e.g., restoring a persisted instance)
    pub fn set_state(&mut self, state: impl Into<String>) -> Result<()> {
        let state = state.into();
        if !self.machine.has_state(&state) {
            return Err(Error::Validation(format!(
                "trait {} has no state '{}'",
                self.name(),
                state
            )));
        }
        self.current_state = state;
        Ok(())
    }

    /// Dispatch one event
    ///
    /// `ctx.state` is set to the current state before guards run. When no
    /// candidate's guard holds nothing happens and `None` is returned.
    pub fn dispatch(&mut self, event: &str, ctx: &mut EvalContext) -> Option<Transition> {
        ctx.state = self.current_state.clone();
        let index = self.machine.select(&self.current_state, event, ctx)?;
        let to = self.machine.transition(index)?.to.clone();
        tracing::debug!(
            trait_name = %self.name(),
            from = %self.current_state,
            to = %to,
            event = %event,
            "Transition"
        );
        self.machine.run_effects(index, ctx);
        let from = std::mem::replace(&mut self.current_state, to.clone());
        Some(Transition {
            from,
            to,
            event: event.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Value, ValueMap};
    use serde_json::json;

    fn expr(json: serde_json::Value) -> SExpr {
        SExpr::from_json(json).unwrap()
    }

    fn retry_trait() -> TraitDef {
        TraitDef::new("Retry")
            .with_state(StateDef::initial("Pending"))
            .with_state(StateDef::new("Active"))
            .with_state(StateDef::new("Failed"))
            .with_transition(
                TransitionDef::new("Pending", "START", "Active")
                    .with_guard(expr(json!(["<", "@entity.attempt", "@config.maxAttempts"])))
                    .with_effect(expr(json!(["emit", "STARTED", {"at": "@now"}]))),
            )
            .with_transition(TransitionDef::new("Pending", "START", "Failed"))
    }

    fn ctx_with_attempt(attempt: i64) -> EvalContext {
        let mut entity = ValueMap::new();
        entity.insert("attempt".into(), Value::Int(attempt));
        EvalContext::default()
            .with_entity(entity)
            .with_config(json!({"maxAttempts": 3}))
            .with_clock(1_000)
    }

    #[test]
    fn test_guard_selects_first_passing_transition() {
        let machine = Arc::new(TraitMachine::new(retry_trait(), &Evaluator::new()).unwrap());

        let mut instance = TraitInstance::new(machine.clone());
        let mut ctx = ctx_with_attempt(2);
        let fired = instance.dispatch("START", &mut ctx).unwrap();
        assert_eq!(fired.to, "Active");
        assert_eq!(ctx.state, "Pending");
        let emitted = ctx.take_outcome().emitted;
        assert_eq!(emitted[0].event, "STARTED");
        assert_eq!(emitted[0].payload.get_path(&["at"]), Value::Int(1_000));

        let mut instance = TraitInstance::new(machine);
        let mut ctx = ctx_with_attempt(3);
        assert_eq!(instance.dispatch("START", &mut ctx).unwrap().to, "Failed");
        assert!(ctx.take_outcome().emitted.is_empty());
    }

    #[test]
    fn test_false_guard_is_skipped_in_declaration_order() {
        let def = TraitDef::new("T")
            .with_state(StateDef::initial("A"))
            .with_state(StateDef::new("B"))
            .with_state(StateDef::new("C"))
            .with_transition(TransitionDef::new("A", "X", "B"))
            .with_transition(TransitionDef::new("A", "X", "C").with_guard(expr(json!(false))));
        let machine = Arc::new(TraitMachine::new(def, &Evaluator::new()).unwrap());
        let mut instance = TraitInstance::new(machine);
        instance.dispatch("X", &mut EvalContext::default());
        assert_eq!(instance.current_state(), "B");
    }

    #[test]
    fn test_unmatched_event_is_a_no_op() {
        let machine = Arc::new(TraitMachine::new(retry_trait(), &Evaluator::new()).unwrap());
        let mut instance = TraitInstance::new(machine);
        let mut ctx = ctx_with_attempt(0);
        assert!(instance.dispatch("UNKNOWN", &mut ctx).is_none());
        assert_eq!(instance.current_state(), "Pending");
        assert!(ctx.outcome.is_empty());
    }

    #[test]
    fn test_validation() {
        let ev = Evaluator::new();
        let none = TraitDef::new("T").with_state(StateDef::new("A"));
        assert!(matches!(TraitMachine::new(none, &ev), Err(Error::Construction { .. })));

        let two = TraitDef::new("T")
            .with_state(StateDef::initial("A"))
            .with_state(StateDef::initial("B"));
        assert!(TraitMachine::new(two, &ev).is_err());

        let unknown = TraitDef::new("T")
            .with_state(StateDef::initial("A"))
            .with_transition(TransitionDef::new("A", "GO", "Nowhere"));
        assert!(TraitMachine::new(unknown, &ev).is_err());

        let impure = TraitDef::new("T")
            .with_state(StateDef::initial("A"))
            .with_transition(
                TransitionDef::new("A", "GO", "A").with_guard(expr(json!(["emit", "X"]))),
            );
        let err = TraitMachine::new(impure, &ev).unwrap_err();
        assert!(err.to_string().contains("emit"));

        let mut undeclared = retry_trait();
        undeclared.events = vec!["STOP".into()];
        assert!(TraitMachine::new(undeclared, &ev).is_err());
    }

    #[test]
    fn test_deserialize_from_schema_json() {
        let def: TraitDef = serde_json::from_value(json!({
            "name": "Toggle",
            "states": [{"name": "Off", "isInitial": true}, {"name": "On"}],
            "transitions": [
                {"from": "Off", "to": "On", "event": "FLIP", "effects": [["set", "@entity.on", true]]},
                {"from": "On", "to": "Off", "event": "FLIP", "guard": ["=", "@entity.on", true]}
            ],
            "listens": [{"event": "RESET", "triggers": "FLIP"}]
        }))
        .unwrap();
        let machine = TraitMachine::new(def, &Evaluator::new()).unwrap();
        assert_eq!(machine.initial_state(), "Off");
        assert_eq!(machine.available_events("Off"), vec!["FLIP"]);
        assert_eq!(machine.def().listens[0].triggers, "FLIP");

        let mut instance = TraitInstance::new(Arc::new(machine));
        let mut ctx = EvalContext::default();
        instance.dispatch("FLIP", &mut ctx);
        assert_eq!(ctx.entity["on"], Value::Bool(true));
        instance.dispatch("FLIP", &mut ctx);
        assert_eq!(instance.current_state(), "Off");
        assert!(instance.set_state("Nope").is_err());
    }
}
