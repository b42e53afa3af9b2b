//! Database store wrapper.

use crate::error::{Error, Result};
use crate::models::*;
use almadar_core::persistence::with_record_id;
use almadar_core::{Persistence, Value, ValueMap};
use native_db::*;
use std::path::Path;
use std::sync::LazyLock;

static MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut models = Models::new();
    if let Err(err) = models.define::<StoredRecord>() {
        tracing::error!(error = %err, "Failed to define record model");
    }
    models
});

/// native_db-backed entity persistence.
pub struct Store {
    pub(crate) db: Database<'static>,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Builder::new()
            .create(&MODELS, path.as_ref())
            .map_err(|e| Error::Database(e.to_string()))?;
        tracing::info!(path = %path.as_ref().display(), "Opened record store");
        Ok(Self { db })
    }

    /// Create an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let db = Builder::new()
            .create_in_memory(&MODELS)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Self { db })
    }

    /// Save a record as-is, replacing any previous version.
    pub fn save(&self, entity_type: &str, id: &str, fields: &ValueMap) -> Result<()> {
        let stored = StoredRecord::from_fields(entity_type, id, fields)?;
        let rw = self.db.rw_transaction()?;
        rw.upsert(stored)?;
        rw.commit()?;
        Ok(())
    }

    /// Load a record by type and id.
    pub fn load(&self, entity_type: &str, id: &str) -> Result<Option<ValueMap>> {
        let r = self.db.r_transaction()?;
        let stored: Option<StoredRecord> = r.get().primary(StoredRecord::key(entity_type, id))?;
        stored.map(|s| s.to_fields()).transpose()
    }

    /// Remove a record; false when it did not exist.
    pub fn remove(&self, entity_type: &str, id: &str) -> Result<bool> {
        let rw = self.db.rw_transaction()?;
        let stored: Option<StoredRecord> = rw.get().primary(StoredRecord::key(entity_type, id))?;
        let found = stored.is_some();
        if let Some(s) = stored {
            rw.remove(s)?;
        }
        rw.commit()?;
        Ok(found)
    }

    /// All stored rows of a type, in key order.
    pub fn records_of(&self, entity_type: &str) -> Result<Vec<StoredRecord>> {
        let r = self.db.r_transaction()?;
        let scan = r.scan().secondary::<StoredRecord>(StoredRecordKey::entity_type)?;
        let iter = scan.start_with(entity_type)?;
        let records: std::result::Result<Vec<StoredRecord>, _> = iter.collect();
        let records = records.map_err(|e| Error::Database(e.to_string()))?;
        // `start_with` is a prefix match; "Task" would also see "TaskList".
        Ok(records
            .into_iter()
            .filter(|r| r.entity_type == entity_type)
            .collect())
    }

    /// Count records of a type.
    pub fn count(&self, entity_type: &str) -> Result<usize> {
        Ok(self.records_of(entity_type)?.len())
    }

    /// Clear all data.
    pub fn clear(&self) -> Result<()> {
        let keys: Vec<String> = {
            let r = self.db.r_transaction()?;
            let scan = r.scan().primary::<StoredRecord>()?;
            let iter = scan.all()?;
            let records: std::result::Result<Vec<StoredRecord>, _> = iter.collect();
            let records = records.map_err(|e| Error::Database(e.to_string()))?;
            records.into_iter().map(|r| r.key).collect()
        };

        let rw = self.db.rw_transaction()?;
        for key in keys {
            if let Some(record) = rw.get().primary::<StoredRecord>(key)? {
                rw.remove(record)?;
            }
        }
        rw.commit()?;
        Ok(())
    }

    fn merge(&self, entity_type: &str, id: &str, data: ValueMap) -> Result<ValueMap> {
        let rw = self.db.rw_transaction()?;
        let existing: Option<StoredRecord> = rw.get().primary(StoredRecord::key(entity_type, id))?;
        let mut record = match existing {
            Some(stored) => stored.to_fields()?,
            None => {
                let mut fresh = ValueMap::new();
                fresh.insert("id".to_string(), Value::from(id));
                fresh
            }
        };
        for (k, v) in data {
            if k != "id" {
                record.insert(k, v);
            }
        }
        rw.upsert(StoredRecord::from_fields(entity_type, id, &record)?)?;
        rw.commit()?;
        Ok(record)
    }
}

impl Persistence for Store {
    fn create(&self, entity_type: &str, data: ValueMap) -> almadar_core::Result<ValueMap> {
        let (id, record) = with_record_id(data);
        self.save(entity_type, &id, &record)?;
        Ok(record)
    }

    fn update(&self, entity_type: &str, id: &str, data: ValueMap) -> almadar_core::Result<ValueMap> {
        Ok(self.merge(entity_type, id, data)?)
    }

    fn delete(&self, entity_type: &str, id: &str) -> almadar_core::Result<bool> {
        Ok(self.remove(entity_type, id)?)
    }

    fn get(&self, entity_type: &str, id: &str) -> almadar_core::Result<Option<ValueMap>> {
        Ok(self.load(entity_type, id)?)
    }

    fn list(&self, entity_type: &str) -> almadar_core::Result<Vec<ValueMap>> {
        let records = self.records_of(entity_type)?;
        let fields: Result<Vec<ValueMap>> = records.iter().map(StoredRecord::to_fields).collect();
        Ok(fields?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, Value)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_create_then_read_back() {
        let store = Store::in_memory().unwrap();
        let created = store
            .create("Task", data(&[("title", Value::from("Ship")), ("n", Value::Int(3))]))
            .unwrap();
        let id = created["id"].to_text();

        let loaded = Persistence::get(&store, "Task", &id).unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.keys().next().map(String::as_str), Some("id"));
    }

    #[test]
    fn test_update_merges_and_upserts() {
        let store = Store::in_memory().unwrap();
        store
            .create("Task", data(&[("id", Value::from("a")), ("n", Value::Int(1)), ("keep", Value::Bool(true))]))
            .unwrap();

        let updated = store.update("Task", "a", data(&[("n", Value::Int(2))])).unwrap();
        assert_eq!(updated["n"], Value::Int(2));
        assert_eq!(updated["keep"], Value::Bool(true));

        let inserted = store.update("Task", "b", data(&[("n", Value::Int(9))])).unwrap();
        assert_eq!(inserted["id"], Value::from("b"));
        assert_eq!(store.count("Task").unwrap(), 2);
    }

    #[test]
    fn test_list_is_scoped_to_exact_type() {
        let store = Store::in_memory().unwrap();
        store.create("Task", data(&[("id", Value::from("a"))])).unwrap();
        store.create("TaskList", data(&[("id", Value::from("l"))])).unwrap();

        let tasks = store.list("Task").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["id"], Value::from("a"));
        assert!(store.list("Missing").unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let store = Store::in_memory().unwrap();
        store.create("Task", data(&[("id", Value::from("a"))])).unwrap();
        store.create("Task", data(&[("id", Value::from("b"))])).unwrap();

        assert!(store.delete("Task", "a").unwrap());
        assert!(!store.delete("Task", "a").unwrap());
        assert_eq!(store.count("Task").unwrap(), 1);

        store.clear().unwrap();
        assert_eq!(store.count("Task").unwrap(), 0);
    }

    #[test]
    fn test_runtime_bridge_uses_store() {
        use almadar_core::{EventRequest, OrbitalRegistration, Runtime};
        use std::sync::Arc;

        let store = Arc::new(Store::in_memory().unwrap());
        let runtime = Runtime::builder().persistence(store.clone()).build();
        runtime.register(OrbitalRegistration::new("Tasks", "Task")).unwrap();

        let response = runtime.process(
            "Tasks",
            EventRequest::new("ENTITY_CREATE").with_payload(serde_json::json!({"data": {"title": "x"}})),
        );
        assert!(response.success);
        assert_eq!(store.count("Task").unwrap(), 1);
    }
}
