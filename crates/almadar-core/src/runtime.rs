//! Orbital event processor
//!
//! [`Runtime`] owns the orbital registry, the shared services effects talk
//! to, and the current state of every trait instance. One call to
//! [`Runtime::process`] runs one event to completion:
//!
//! 1. `ENTITY_CREATE`/`ENTITY_UPDATE`/`ENTITY_DELETE` go straight to persistence.
//! 2. Otherwise each trait of the orbital dispatches the event against a
//!    snapshot of its state; new states are committed afterwards.
//! 3. Emitted events trigger listening traits (one hop), then every emitted
//!    event is published on the bus.

use crate::bus::EventBus;
use crate::config::RuntimeConfig;
use crate::effect::{EffectHandlers, EffectOutcome, EffectResult, EmittedEvent, PersistAction, ServiceCall};
use crate::entity::EntityStore;
use crate::eval::{Evaluator, OperatorTable};
use crate::integrator::{Integrator, IntegratorRegistry};
use crate::orbital::{Orbital, OrbitalRegistration, OrbitalRegistry};
use crate::persistence::{InMemoryRepository, Persistence};
use crate::scheduler::Scheduler;
use crate::slot::{RenderOutcome, RenderRequest, SlotManager};
use crate::state_machine::TraitInstance;
use crate::{EffectError, Error, EvalContext, Result, Value, ValueMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const ENTITY_CREATE: &str = "ENTITY_CREATE";
pub const ENTITY_UPDATE: &str = "ENTITY_UPDATE";
pub const ENTITY_DELETE: &str = "ENTITY_DELETE";

/// An incoming event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, with = "crate::value::json")]
    pub payload: Value,
}

impl EventRequest {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            entity_id: None,
            payload: Value::object(),
        }
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// Outcome of processing one event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub success: bool,
    /// Whether any trait changed state
    pub transitioned: bool,
    /// State of the first trait that transitioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<String>,
    /// Current state per trait (`Orbital.Trait` for listeners in other orbitals)
    pub states: IndexMap<String, String>,
    pub emitted_events: Vec<EmittedEvent>,
    #[serde(serialize_with = "crate::value::json_list::serialize")]
    pub client_effects: Vec<Value>,
    pub effect_results: Vec<EffectResult>,
    #[serde(serialize_with = "crate::value::json_map::serialize")]
    pub data: ValueMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EffectError>,
}

impl EventResponse {
    /// A failed response carrying only the error
    pub fn failed(error: impl Into<EffectError>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn absorb(&mut self, outcome: EffectOutcome) {
        self.emitted_events.extend(outcome.emitted);
        self.client_effects.extend(outcome.client_effects);
        self.effect_results.extend(outcome.effect_results);
        self.data.extend(outcome.data);
    }
}

/// Introspection view of one trait
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitInfo {
    pub name: String,
    pub states: Vec<String>,
    pub initial_state: String,
    /// State of the instance not bound to any entity
    pub current_state: String,
    pub events: Vec<String>,
    pub listens: Vec<String>,
}

/// Introspection view of an orbital
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrbitalInfo {
    pub name: String,
    pub entity_type: String,
    pub traits: Vec<TraitInfo>,
}

/// Services shared by every dispatch
struct Services {
    persistence: Arc<dyn Persistence>,
    entities: RwLock<EntityStore>,
    slots: SlotManager,
    integrators: IntegratorRegistry,
    bus: EventBus,
    scheduler: Option<Arc<dyn Scheduler>>,
}

/// [`EffectHandlers`] wired to the runtime's services
struct RuntimeHandlers {
    services: Arc<Services>,
}

impl EffectHandlers for RuntimeHandlers {
    fn persist(
        &self,
        action: PersistAction,
        entity_type: &str,
        id: Option<&str>,
        data: &Value,
    ) -> std::result::Result<Value, EffectError> {
        let store = &self.services.persistence;
        let fields = data.as_object().cloned().unwrap_or_default();
        let missing_id = || EffectError::new("VALIDATION_ERROR", format!("{} requires an id", action));
        let record = match action {
            PersistAction::Create => Value::Object(store.create(entity_type, fields)?),
            PersistAction::Update => {
                let id = id.ok_or_else(missing_id)?;
                Value::Object(store.update(entity_type, id, fields)?)
            }
            PersistAction::Delete => {
                let id = id.ok_or_else(missing_id)?;
                let deleted = store.delete(entity_type, id)?;
                let mut marker = ValueMap::new();
                marker.insert("deleted".into(), Value::Bool(deleted));
                marker.insert("id".into(), Value::from(id));
                Value::Object(marker)
            }
        };
        Ok(record)
    }

    fn fetch_one(&self, entity_type: &str, id: &str) -> std::result::Result<Value, EffectError> {
        Ok(self
            .services
            .persistence
            .get(entity_type, id)?
            .map(Value::Object)
            .unwrap_or(Value::Null))
    }

    fn fetch_all(&self, entity_type: &str) -> std::result::Result<Vec<Value>, EffectError> {
        Ok(self
            .services
            .persistence
            .list(entity_type)?
            .into_iter()
            .map(Value::Object)
            .collect())
    }

    fn call_service(&self, call: ServiceCall) -> std::result::Result<(), EffectError> {
        let known = self.services.integrators.get(&call.service).is_some();
        self.services.integrators.execute(&call, &self.services.bus);
        if known {
            Ok(())
        } else {
            Err(EffectError::new(
                "UNKNOWN_SERVICE",
                format!("no integrator named '{}'", call.service),
            ))
        }
    }

    fn render_ui(&self, request: RenderRequest) -> std::result::Result<(), EffectError> {
        if let RenderOutcome::Rejected { existing_priority } = self.services.slots.render(request) {
            tracing::debug!(existing_priority, "render-ui kept existing content");
        }
        Ok(())
    }

    fn spawn(&self, entity_type: &str, fields: ValueMap) -> std::result::Result<String, EffectError> {
        let mut entities = self
            .services
            .entities
            .write()
            .map_err(|_| EffectError::new("INTERNAL_ERROR", "entity store lock poisoned"))?;
        Ok(entities.spawn(entity_type, fields)?)
    }

    fn despawn(&self, id: &str) -> std::result::Result<bool, EffectError> {
        let mut entities = self
            .services
            .entities
            .write()
            .map_err(|_| EffectError::new("INTERNAL_ERROR", "entity store lock poisoned"))?;
        Ok(entities.remove(id).is_some())
    }

    fn emit(&self, event: &str, payload: &Value) {
        self.services.bus.emit(event, payload.clone());
    }

    fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        self.services.scheduler.clone()
    }
}

/// Trait instance key: (orbital, trait, entity id or empty)
type InstanceKey = (String, String, String);

/// Builder for [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    operators: Option<OperatorTable>,
    persistence: Option<Arc<dyn Persistence>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    integrators: Vec<Arc<dyn Integrator>>,
    bus: Option<EventBus>,
    clock: Option<i64>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the standard operator catalog
    pub fn operators(mut self, operators: OperatorTable) -> Self {
        self.operators = Some(operators);
        self
    }

    /// Storage backend; an in-memory repository otherwise
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn integrator(mut self, integrator: Arc<dyn Integrator>) -> Self {
        self.integrators.push(integrator);
        self
    }

    /// Share an existing bus
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Pin `@now` to a fixed epoch-millisecond value
    pub fn fixed_clock(mut self, now_ms: i64) -> Self {
        self.clock = Some(now_ms);
        self
    }

    pub fn build(self) -> Runtime {
        let evaluator = match self.operators {
            Some(ops) => Evaluator::with_operators(ops, &self.config),
            None => Evaluator::with_config(&self.config),
        };
        let bus = self.bus.unwrap_or_default();
        let slots = SlotManager::new(self.scheduler.clone());
        let dismiss_bus = bus.clone();
        slots.set_dismiss_hook(Arc::new(move |slot, content| {
            if let Some(event) = &content.on_dismiss {
                let mut payload = ValueMap::new();
                payload.insert("slot".into(), Value::from(slot));
                payload.insert("id".into(), Value::from(content.id.as_str()));
                dismiss_bus.emit(event, Value::Object(payload));
            }
        }));
        let integrators = IntegratorRegistry::new();
        for integrator in self.integrators {
            integrators.register(integrator);
        }
        let services = Arc::new(Services {
            persistence: self
                .persistence
                .unwrap_or_else(|| Arc::new(InMemoryRepository::new())),
            entities: RwLock::new(EntityStore::new()),
            slots,
            integrators,
            bus,
            scheduler: self.scheduler,
        });
        let handlers: Arc<dyn EffectHandlers> = Arc::new(RuntimeHandlers {
            services: services.clone(),
        });
        Runtime {
            config: self.config,
            evaluator,
            registry: Arc::new(OrbitalRegistry::new()),
            services,
            handlers,
            instances: RwLock::new(HashMap::new()),
            clock: self.clock,
        }
    }
}

/// The orbital event processor
pub struct Runtime {
    config: RuntimeConfig,
    evaluator: Evaluator,
    registry: Arc<OrbitalRegistry>,
    services: Arc<Services>,
    handlers: Arc<dyn EffectHandlers>,
    instances: RwLock<HashMap<InstanceKey, String>>,
    clock: Option<i64>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime with in-memory persistence and no scheduler
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn registry(&self) -> &Arc<OrbitalRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.services.bus
    }

    pub fn slots(&self) -> &SlotManager {
        &self.services.slots
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.services.persistence
    }

    pub fn integrators(&self) -> &IntegratorRegistry {
        &self.services.integrators
    }

    /// Read access to the runtime entity store
    pub fn with_entities<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> Option<R> {
        self.services.entities.read().ok().map(|store| f(&store))
    }

    /// Validate, compile and register an orbital
    pub fn register(&self, registration: OrbitalRegistration) -> Result<()> {
        self.registry.register(registration, &self.evaluator)?;
        Ok(())
    }

    /// Remove an orbital and forget its instances
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name);
        if removed {
            if let Ok(mut instances) = self.instances.write() {
                instances.retain(|(orbital, _, _), _| orbital != name);
            }
        }
        removed
    }

    pub fn orbital_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Trait and state introspection for one orbital
    pub fn describe(&self, name: &str) -> Option<OrbitalInfo> {
        let orbital = self.registry.get(name)?;
        let traits = orbital
            .traits
            .iter()
            .map(|machine| {
                let def = machine.def();
                let mut events: Vec<String> = def.events.clone();
                for t in &def.transitions {
                    if !events.contains(&t.event) {
                        events.push(t.event.clone());
                    }
                }
                TraitInfo {
                    name: def.name.clone(),
                    states: def.states.iter().map(|s| s.name.clone()).collect(),
                    initial_state: machine.initial_state().to_string(),
                    current_state: self.current_state(&orbital, machine.name(), None),
                    events,
                    listens: def.listens.iter().map(|l| l.event.clone()).collect(),
                }
            })
            .collect();
        Some(OrbitalInfo {
            name: orbital.name.clone(),
            entity_type: orbital.entity_type.clone(),
            traits,
        })
    }

    /// Current state of a trait instance (initial state if never dispatched)
    pub fn state_of(&self, orbital: &str, trait_name: &str, entity_id: Option<&str>) -> Option<String> {
        let orbital = self.registry.get(orbital)?;
        orbital.find_trait(trait_name)?;
        Some(self.current_state(&orbital, trait_name, entity_id))
    }

    /// Process one event against an orbital
    ///
    /// Failures are reported in the response, never returned or panicked.
    pub fn process(&self, orbital_name: &str, request: EventRequest) -> EventResponse {
        let Some(orbital) = self.registry.get(orbital_name) else {
            return EventResponse::failed(Error::OrbitalNotFound(orbital_name.to_string()));
        };
        tracing::debug!(orbital = %orbital_name, event = %request.event, "Processing event");

        let mut response = match request.event.as_str() {
            ENTITY_CREATE | ENTITY_UPDATE | ENTITY_DELETE => self.entity_bridge(&orbital, &request),
            _ => match self.dispatch_orbital(&orbital, &request) {
                Ok(response) => response,
                Err(err) => EventResponse::failed(err),
            },
        };

        if response.success {
            self.forward(&orbital, &mut response);
        }
        for event in &response.emitted_events {
            self.services.bus.emit(&event.event, event.payload.clone());
        }
        response
    }

    fn instance_key(orbital: &str, trait_name: &str, entity_id: Option<&str>) -> InstanceKey {
        (
            orbital.to_string(),
            trait_name.to_string(),
            entity_id.unwrap_or_default().to_string(),
        )
    }

    fn current_state(&self, orbital: &Orbital, trait_name: &str, entity_id: Option<&str>) -> String {
        let key = Self::instance_key(&orbital.name, trait_name, entity_id);
        let stored = self
            .instances
            .read()
            .ok()
            .and_then(|instances| instances.get(&key).cloned());
        stored
            .or_else(|| {
                orbital
                    .find_trait(trait_name)
                    .map(|m| m.initial_state().to_string())
            })
            .unwrap_or_default()
    }

    fn load_entity(&self, orbital: &Orbital, entity_id: Option<&str>) -> Result<ValueMap> {
        let Some(id) = entity_id else {
            return Ok(ValueMap::new());
        };
        Ok(self
            .services
            .persistence
            .get(&orbital.entity_type, id)?
            .unwrap_or_else(|| {
                let mut stub = ValueMap::new();
                stub.insert("id".into(), Value::from(id));
                stub
            }))
    }

    fn context(&self, orbital: &Orbital, entity: ValueMap, request: &EventRequest) -> EvalContext {
        let mut ctx = EvalContext::new(self.handlers.clone())
            .with_entity(entity)
            .with_payload(request.payload.clone())
            .with_config(orbital.config.clone())
            .with_entity_id(request.entity_id.clone());
        if let Some(now) = self.clock {
            ctx = ctx.with_clock(now);
        }
        ctx
    }

    /// Dispatch through one trait, committing its new state
    ///
    /// Returns whether the trait transitioned.
    fn dispatch_trait(
        &self,
        orbital: &Orbital,
        trait_name: &str,
        event: &str,
        ctx: &mut EvalContext,
        entity_id: Option<&str>,
    ) -> Option<String> {
        let machine = orbital.find_trait(trait_name)?.clone();
        let mut instance = TraitInstance::new(machine);
        let snapshot = self.current_state(orbital, trait_name, entity_id);
        if let Err(err) = instance.set_state(snapshot) {
            tracing::warn!(error = %err, "Stored state no longer exists; using initial state");
        }
        let mut info = ValueMap::new();
        info.insert("name".into(), Value::from(trait_name));
        info.insert("orbital".into(), Value::from(orbital.name.as_str()));
        info.insert("state".into(), Value::from(instance.current_state()));
        ctx.trait_info = Value::Object(info);

        let fired = instance.dispatch(event, ctx)?;
        let key = Self::instance_key(&orbital.name, trait_name, entity_id);
        if let Ok(mut instances) = self.instances.write() {
            instances.insert(key, fired.to.clone());
        }
        Some(fired.to)
    }

    fn dispatch_orbital(&self, orbital: &Orbital, request: &EventRequest) -> Result<EventResponse> {
        let entity_id = request.entity_id.as_deref();
        let mut entity = self.load_entity(orbital, entity_id)?;
        let mut response = EventResponse {
            success: true,
            ..Default::default()
        };
        for machine in &orbital.traits {
            let mut ctx = self.context(orbital, entity, request);
            let moved = self.dispatch_trait(orbital, machine.name(), &request.event, &mut ctx, entity_id);
            if let Some(state) = moved {
                response.transitioned = true;
                response.new_state.get_or_insert(state);
            }
            response.states.insert(
                machine.name().to_string(),
                self.current_state(orbital, machine.name(), entity_id),
            );
            response.absorb(ctx.take_outcome());
            entity = ctx.entity;
        }
        Ok(response)
    }

    /// Deliver emitted events to listening traits, one hop
    fn forward(&self, origin: &Orbital, response: &mut EventResponse) {
        if !self.config.forward_listeners || response.emitted_events.is_empty() {
            return;
        }
        let emitted = response.emitted_events.clone();
        for event in emitted {
            for target in self.registry.listeners_for(&event.event) {
                let Some(orbital) = self.registry.get(&target.orbital) else {
                    continue;
                };
                let request = EventRequest::new(target.triggers.as_str()).with_payload(event.payload.clone());
                let mut ctx = self.context(&orbital, ValueMap::new(), &request);
                tracing::debug!(
                    event = %event.event,
                    orbital = %target.orbital,
                    trait_name = %target.trait_name,
                    triggers = %target.triggers,
                    "Forwarding to listener"
                );
                if let Some(state) = self.dispatch_trait(&orbital, &target.trait_name, &target.triggers, &mut ctx, None) {
                    response.transitioned = true;
                    response.new_state.get_or_insert(state.clone());
                    let key = if orbital.name == origin.name {
                        target.trait_name.clone()
                    } else {
                        format!("{}.{}", orbital.name, target.trait_name)
                    };
                    response.states.insert(key, state);
                }
                response.absorb(ctx.take_outcome());
            }
        }
    }

    /// `ENTITY_*` events: direct persistence calls keyed by `payload.entityType`
    fn entity_bridge(&self, orbital: &Orbital, request: &EventRequest) -> EventResponse {
        let entity_type = match request.payload.get_path(&["entityType"]) {
            Value::String(t) if !t.is_empty() => t,
            _ => orbital.entity_type.clone(),
        };
        let entity_id = request
            .entity_id
            .clone()
            .or_else(|| match request.payload.get_path(&["entityId"]) {
                Value::String(id) if !id.is_empty() => Some(id),
                Value::Int(id) => Some(id.to_string()),
                _ => None,
            });
        let fields = match request.payload.get_path(&["data"]) {
            Value::Object(map) => map,
            _ => {
                let mut map = request.payload.as_object().cloned().unwrap_or_default();
                map.shift_remove("entityType");
                map.shift_remove("entityId");
                map
            }
        };

        let action = match request.event.as_str() {
            ENTITY_CREATE => PersistAction::Create,
            ENTITY_UPDATE => PersistAction::Update,
            _ => PersistAction::Delete,
        };
        if action != PersistAction::Create && entity_id.is_none() {
            return EventResponse::failed(Error::Validation(format!(
                "{} requires entityId",
                request.event
            )));
        }

        let handlers = RuntimeHandlers {
            services: self.services.clone(),
        };
        let outcome = handlers.persist(action, &entity_type, entity_id.as_deref(), &Value::Object(fields));
        let mut response = EventResponse::default();
        match outcome {
            Ok(record) => {
                response.success = true;
                response.data.insert(entity_type.clone(), record.clone());
                response.effect_results.push(
                    EffectResult::ok("persist", record)
                        .with_action(action.as_str())
                        .with_entity_type(entity_type.as_str()),
                );
            }
            Err(err) => {
                tracing::warn!(event = %request.event, error = %err, "Entity bridge failed");
                response.error = Some(err.clone());
                response.effect_results.push(
                    EffectResult::failed("persist", err)
                        .with_action(action.as_str())
                        .with_entity_type(entity_type.as_str()),
                );
            }
        }
        for machine in &orbital.traits {
            response.states.insert(
                machine.name().to_string(),
                self.current_state(orbital, machine.name(), entity_id.as_deref()),
            );
        }
        response
    }
}
