//! JSON/RON schema loader

use crate::error::{Error, Result};
use crate::schema::{AppSchema, SchemaFormat};
use almadar_core::orbital::Orbital;
use almadar_core::{Evaluator, OrbitalRegistration, Runtime};
use std::fs;
use std::path::Path;

/// Loader for orbital schema files
pub struct Loader {
    evaluator: Evaluator,
    schema: AppSchema,
}

impl Loader {
    /// Create a loader that checks expressions against the standard catalog
    pub fn new() -> Self {
        Self::with_evaluator(Evaluator::new())
    }

    /// Create a loader that checks expressions against a runtime's catalog
    pub fn with_evaluator(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            schema: AppSchema::default(),
        }
    }

    /// Load a single `.json` or `.ron` file; returns the number of orbitals added
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let format = SchemaFormat::from_path(path).ok_or_else(|| Error::UnsupportedFile(path.to_path_buf()))?;
        let content = fs::read_to_string(path)?;
        let added = self.load_str(&content, format)?;
        tracing::debug!(path = %path.display(), orbitals = added, "Loaded schema file");
        Ok(added)
    }

    /// Load schema text in the given format
    pub fn load_str(&mut self, content: &str, format: SchemaFormat) -> Result<usize> {
        match format {
            SchemaFormat::Json => self.load_json_str(content),
            SchemaFormat::Ron => self.load_ron_str(content),
        }
    }

    /// Load a JSON orbital or application schema
    pub fn load_json_str(&mut self, content: &str) -> Result<usize> {
        let json: serde_json::Value = serde_json::from_str(content)?;
        if json.get("orbitals").is_some() {
            let app: AppSchema = serde_json::from_value(json)?;
            self.add_app(app)
        } else {
            let orbital: OrbitalRegistration = serde_json::from_value(json)?;
            self.add(orbital)?;
            Ok(1)
        }
    }

    /// Load a RON orbital or application schema
    pub fn load_ron_str(&mut self, content: &str) -> Result<usize> {
        if content.contains("orbitals:") {
            let app: AppSchema = ron::from_str(content)?;
            self.add_app(app)
        } else {
            let orbital: OrbitalRegistration = ron::from_str(content)?;
            self.add(orbital)?;
            Ok(1)
        }
    }

    /// Load every schema file under a directory, recursively
    ///
    /// Entries are visited in name order; files with other extensions are skipped.
    pub fn load_directory(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();

        if !path.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {:?}", path),
            )));
        }

        let mut entries: Vec<_> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        entries.sort();

        let mut added = 0;
        for file_path in entries {
            if file_path.is_dir() {
                added += self.load_directory(&file_path)?;
            } else if SchemaFormat::from_path(&file_path).is_some() {
                added += self.load_file(&file_path)?;
            }
        }
        Ok(added)
    }

    /// Add one registration after building it
    pub fn add(&mut self, orbital: OrbitalRegistration) -> Result<()> {
        if self.schema.get(&orbital.name).is_some() {
            return Err(Error::DuplicateDefinition(orbital.name));
        }
        Orbital::build(orbital.clone(), &self.evaluator).map_err(|source| Error::Construction {
            orbital: orbital.name.clone(),
            source,
        })?;
        self.schema.orbitals.push(orbital);
        Ok(())
    }

    fn add_app(&mut self, app: AppSchema) -> Result<usize> {
        if self.schema.name.is_none() {
            self.schema.name = app.name;
            self.schema.version = app.version;
        }
        let count = app.orbitals.len();
        for orbital in app.orbitals {
            self.add(orbital)?;
        }
        Ok(count)
    }

    /// Register every loaded orbital with a runtime, in load order
    pub fn register_all(&self, runtime: &Runtime) -> Result<usize> {
        for orbital in &self.schema.orbitals {
            runtime
                .register(orbital.clone())
                .map_err(|source| Error::Construction {
                    orbital: orbital.name.clone(),
                    source,
                })?;
        }
        tracing::info!(orbitals = self.schema.len(), "Registered schema");
        Ok(self.schema.len())
    }

    /// Finish loading and return the schema
    pub fn finish(self) -> AppSchema {
        self.schema
    }

    /// Get the current schema (for inspection during loading)
    pub fn schema(&self) -> &AppSchema {
        &self.schema
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almadar_core::EventRequest;

    const TASKS_JSON: &str = r#"{
        "name": "Tasks",
        "entityType": "Task",
        "config": {"maxAttempts": 3},
        "traits": [{
            "name": "Status",
            "states": [{"name": "Open", "isInitial": true}, {"name": "Done"}],
            "transitions": [{
                "from": "Open", "to": "Done", "event": "COMPLETE",
                "guard": ["<", "@entity.attempt", "@config.maxAttempts"],
                "effects": [["emit", "TASK_DONE"]]
            }]
        }]
    }"#;

    #[test]
    fn test_load_single_json_orbital() {
        let mut loader = Loader::new();
        assert_eq!(loader.load_json_str(TASKS_JSON).unwrap(), 1);

        let schema = loader.finish();
        let tasks = schema.get("Tasks").unwrap();
        assert_eq!(tasks.entity_type, "Task");
        assert_eq!(tasks.traits[0].transitions[0].effects.len(), 1);
    }

    #[test]
    fn test_load_ron_app_schema() {
        let content = r#"
        (
            name: Some("demo"),
            orbitals: [
                (
                    name: "Lights",
                    entityType: "Light",
                    traits: [
                        (
                            name: "Switch",
                            states: [(name: "Off", isInitial: true), (name: "On")],
                            transitions: [
                                (from: "Off", to: "On", event: "FLIP", effects: [["emit", "FLIPPED", {"at": "@now"}]]),
                                (from: "On", to: "Off", event: "FLIP", guard: Some(["=", "@payload.force", true])),
                            ],
                            listens: [(event: "POWER_CUT", triggers: "FLIP")],
                        ),
                    ],
                ),
            ],
        )
        "#;
        let mut loader = Loader::new();
        assert_eq!(loader.load_ron_str(content).unwrap(), 1);
        let schema = loader.finish();
        assert_eq!(schema.name.as_deref(), Some("demo"));
        let switch = &schema.get("Lights").unwrap().traits[0];
        assert!(switch.transitions[1].guard.is_some());
        assert_eq!(switch.listens[0].triggers, "FLIP");
    }

    #[test]
    fn test_duplicate_orbitals_are_rejected() {
        let mut loader = Loader::new();
        loader.load_json_str(TASKS_JSON).unwrap();
        match loader.load_json_str(TASKS_JSON) {
            Err(Error::DuplicateDefinition(name)) => assert_eq!(name, "Tasks"),
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_construction_errors_surface_at_load() {
        let two_initial = r#"{
            "name": "Bad", "entityType": "X",
            "traits": [{"name": "T", "states": [{"name": "A", "isInitial": true}, {"name": "B", "isInitial": true}]}]
        }"#;
        let mut loader = Loader::new();
        assert!(matches!(
            loader.load_json_str(two_initial),
            Err(Error::Construction { ref orbital, .. }) if orbital == "Bad"
        ));
        assert!(loader.schema().is_empty());

        assert!(matches!(loader.load_json_str("{not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_load_directory_and_register() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_tasks.json"), TASKS_JSON).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("nested").join("lights.ron"),
            r#"(name: "Lights", entityType: "Light", traits: [(name: "Switch", states: [(name: "Off", isInitial: true)])])"#,
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let mut loader = Loader::new();
        assert_eq!(loader.load_directory(dir.path()).unwrap(), 2);
        assert_eq!(loader.schema().names(), vec!["Tasks", "Lights"]);

        let runtime = Runtime::new();
        assert_eq!(loader.register_all(&runtime).unwrap(), 2);
        let response = runtime.process("Tasks", EventRequest::new("COMPLETE"));
        assert!(!response.transitioned);
        assert!(matches!(loader.load_file(dir.path().join("README.md")), Err(Error::UnsupportedFile(_))));
    }
}
