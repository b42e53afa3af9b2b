//! Orbital registrations and the process-wide registry
//!
//! An orbital groups the traits that operate on one entity type. The
//! registry is an explicit service shared by `Arc`; entries live until they
//! are unregistered.

use crate::eval::Evaluator;
use crate::state_machine::{TraitDef, TraitMachine};
use crate::{Error, Result, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Declarative orbital schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrbitalRegistration {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub traits: Vec<TraitDef>,
    /// Exposed to expressions as `@config`
    #[serde(default, with = "crate::value::json")]
    pub config: Value,
}

impl OrbitalRegistration {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            traits: Vec::new(),
            config: Value::object(),
        }
    }

    pub fn with_trait(mut self, def: TraitDef) -> Self {
        self.traits.push(def);
        self
    }

    pub fn with_config(mut self, config: impl Into<Value>) -> Self {
        self.config = config.into();
        self
    }
}

/// A registered orbital with compiled traits
#[derive(Debug)]
pub struct Orbital {
    pub name: String,
    pub entity_type: String,
    pub config: Value,
    pub traits: Vec<Arc<TraitMachine>>,
}

impl Orbital {
    /// Validate and compile a registration
    pub fn build(registration: OrbitalRegistration, evaluator: &Evaluator) -> Result<Self> {
        if registration.name.is_empty() {
            return Err(Error::construction("orbital", "orbital name is empty"));
        }
        let mut traits: Vec<Arc<TraitMachine>> = Vec::with_capacity(registration.traits.len());
        for def in registration.traits {
            if traits.iter().any(|t| t.name() == def.name) {
                return Err(Error::construction(
                    format!("orbital {}", registration.name),
                    format!("duplicate trait '{}'", def.name),
                ));
            }
            traits.push(Arc::new(TraitMachine::new(def, evaluator)?));
        }
        Ok(Self {
            name: registration.name,
            entity_type: registration.entity_type,
            config: registration.config,
            traits,
        })
    }

    pub fn find_trait(&self, name: &str) -> Option<&Arc<TraitMachine>> {
        self.traits.iter().find(|t| t.name() == name)
    }
}

/// A listener declared by some trait: dispatch `triggers` on `orbital`/`trait`
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerTarget {
    pub orbital: String,
    pub trait_name: String,
    pub triggers: String,
}

/// Name-keyed registry of orbitals
#[derive(Debug, Default)]
pub struct OrbitalRegistry {
    orbitals: RwLock<IndexMap<String, Arc<Orbital>>>,
}

impl OrbitalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register; fails on construction errors or a taken name
    pub fn register(&self, registration: OrbitalRegistration, evaluator: &Evaluator) -> Result<Arc<Orbital>> {
        let orbital = Arc::new(Orbital::build(registration, evaluator)?);
        let mut orbitals = self
            .orbitals
            .write()
            .map_err(|_| Error::Validation("orbital registry lock poisoned".into()))?;
        if orbitals.contains_key(&orbital.name) {
            return Err(Error::DuplicateRegistration(orbital.name.clone()));
        }
        tracing::debug!(orbital = %orbital.name, traits = orbital.traits.len(), "Registered orbital");
        orbitals.insert(orbital.name.clone(), orbital.clone());
        Ok(orbital)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.orbitals
            .write()
            .map(|mut o| o.shift_remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Orbital>> {
        self.orbitals.read().ok()?.get(name).cloned()
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.orbitals
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.orbitals.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every trait listening for `event`, in registration order
    pub fn listeners_for(&self, event: &str) -> Vec<ListenerTarget> {
        let Ok(orbitals) = self.orbitals.read() else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        for orbital in orbitals.values() {
            for machine in &orbital.traits {
                for listen in machine.def().listens.iter().filter(|l| l.event == event) {
                    targets.push(ListenerTarget {
                        orbital: orbital.name.clone(),
                        trait_name: machine.name().to_string(),
                        triggers: listen.triggers.clone(),
                    });
                }
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{StateDef, TransitionDef};
    use serde_json::json;

    fn toggle(name: &str) -> TraitDef {
        TraitDef::new(name)
            .with_state(StateDef::initial("Off"))
            .with_state(StateDef::new("On"))
            .with_transition(TransitionDef::new("Off", "FLIP", "On"))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = OrbitalRegistry::new();
        let ev = Evaluator::new();
        registry
            .register(OrbitalRegistration::new("Lights", "Light").with_trait(toggle("Switch")), &ev)
            .unwrap();

        let orbital = registry.get("Lights").unwrap();
        assert_eq!(orbital.entity_type, "Light");
        assert!(orbital.find_trait("Switch").is_some());
        assert_eq!(registry.names(), vec!["Lights"]);

        let dup = registry.register(OrbitalRegistration::new("Lights", "Light"), &ev);
        assert!(matches!(dup, Err(Error::DuplicateRegistration(_))));

        assert!(registry.unregister("Lights"));
        assert!(!registry.unregister("Lights"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_construction_errors_leave_registry_unchanged() {
        let registry = OrbitalRegistry::new();
        let ev = Evaluator::new();
        let bad = OrbitalRegistration::new("Bad", "X").with_trait(TraitDef::new("NoStates"));
        assert!(matches!(registry.register(bad, &ev), Err(Error::Construction { .. })));

        let twice = OrbitalRegistration::new("Twice", "X")
            .with_trait(toggle("A"))
            .with_trait(toggle("A"));
        assert!(registry.register(twice, &ev).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_listeners_for() {
        let registry = OrbitalRegistry::new();
        let ev = Evaluator::new();
        registry
            .register(
                OrbitalRegistration::new("Audit", "Log")
                    .with_trait(toggle("Recorder").with_listener("TASK_DONE", "FLIP")),
                &ev,
            )
            .unwrap();
        let targets = registry.listeners_for("TASK_DONE");
        assert_eq!(
            targets,
            vec![ListenerTarget {
                orbital: "Audit".into(),
                trait_name: "Recorder".into(),
                triggers: "FLIP".into(),
            }]
        );
        assert!(registry.listeners_for("OTHER").is_empty());
    }

    #[test]
    fn test_registration_from_json() {
        let registration: OrbitalRegistration = serde_json::from_value(json!({
            "name": "Tasks",
            "entityType": "Task",
            "config": {"maxAttempts": 3},
            "traits": []
        }))
        .unwrap();
        assert_eq!(registration.config.get_path(&["maxAttempts"]), Value::Int(3));
    }
}
