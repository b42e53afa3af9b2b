//! Almadar Core - S-expression evaluator and orbital event processor
//!
//! This crate provides the execution layer for Almadar schemas:
//! - Dynamic values (`Value`, `ValueMap`) and S-expressions (`SExpr`)
//! - An evaluator with a namespaced standard library and a compile cache
//! - Trait state machines grouped into orbitals
//! - The event processor (`Runtime`) with its slot manager and event bus
//!
//! ## Effects
//!
//! Expressions never touch storage, services or the UI directly. Effect
//! operators call an injected [`EffectHandlers`] implementation; the runtime
//! wires one to its [`Persistence`] backend, [`IntegratorRegistry`],
//! [`SlotManager`] and [`EventBus`].
//!
//! ```
//! use almadar_core::{EventRequest, OrbitalRegistration, Runtime, SExpr, StateDef, TraitDef, TransitionDef};
//!
//! let runtime = Runtime::new();
//! let emit = SExpr::from_json(serde_json::json!(["emit", "STARTED"])).unwrap();
//! runtime
//!     .register(
//!         OrbitalRegistration::new("Jobs", "Job").with_trait(
//!             TraitDef::new("Lifecycle")
//!                 .with_state(StateDef::initial("Pending"))
//!                 .with_state(StateDef::new("Active"))
//!                 .with_transition(TransitionDef::new("Pending", "START", "Active").with_effect(emit)),
//!         ),
//!     )
//!     .unwrap();
//!
//! let response = runtime.process("Jobs", EventRequest::new("START"));
//! assert_eq!(response.new_state.as_deref(), Some("Active"));
//! ```

pub mod bus;
pub mod config;
pub mod context;
pub mod effect;
pub mod entity;
mod error;
pub mod eval;
pub mod integrator;
pub mod orbital;
pub mod persistence;
pub mod rng;
pub mod runtime;
pub mod scheduler;
pub mod sexpr;
pub mod slot;
pub mod state_machine;
mod stdlib;
pub mod value;

pub use bus::{BusEvent, EventBus, ListenerError, Unsubscribe};
pub use config::RuntimeConfig;
pub use context::EvalContext;
pub use effect::{EffectHandlers, EffectOutcome, EffectResult, EmittedEvent, NoopHandlers, PersistAction, ServiceCall};
pub use entity::{EntityRecord, EntityStore};
pub use error::{EffectError, Error, Result};
pub use eval::{Evaluator, OpHandler, OpKind, OperatorTable};
pub use integrator::{Integrator, IntegratorRegistry, ServiceCallbacks};
pub use orbital::{Orbital, OrbitalRegistration, OrbitalRegistry};
pub use persistence::{InMemoryRepository, Persistence};
pub use runtime::{EventRequest, EventResponse, OrbitalInfo, Runtime, RuntimeBuilder, TraitInfo};
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskId};
pub use sexpr::SExpr;
pub use slot::{RenderOutcome, RenderRequest, SlotContent, SlotManager};
pub use state_machine::{ListenDef, StateDef, TraitDef, TraitInstance, TraitMachine, Transition, TransitionDef};
pub use value::{Value, ValueMap};
