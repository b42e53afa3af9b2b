//! Persistence interface and the in-memory repository
//!
//! Records are flat objects keyed by entity type and `id`. `persist`,
//! `fetch` and the `ENTITY_*` bridge are the only callers.

use crate::{Error, Result, Value, ValueMap};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage backend for entity records
pub trait Persistence: Send + Sync {
    /// Store a new record; an `id` is assigned (UUID v4) unless supplied
    fn create(&self, entity_type: &str, data: ValueMap) -> Result<ValueMap>;

    /// Merge fields into a record, creating it when it does not exist
    fn update(&self, entity_type: &str, id: &str, data: ValueMap) -> Result<ValueMap>;

    /// Remove a record; false when it did not exist
    fn delete(&self, entity_type: &str, id: &str) -> Result<bool>;

    fn get(&self, entity_type: &str, id: &str) -> Result<Option<ValueMap>>;

    /// Every record of a type
    fn list(&self, entity_type: &str) -> Result<Vec<ValueMap>>;
}

/// Id carried by a record, if any
pub fn record_id(data: &ValueMap) -> Option<String> {
    match data.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Int(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Take `data`'s id or assign a fresh one, returning the record with `id` first
pub fn with_record_id(mut data: ValueMap) -> (String, ValueMap) {
    let id = record_id(&data).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    data.shift_remove("id");
    let mut record = ValueMap::with_capacity(data.len() + 1);
    record.insert("id".to_string(), Value::from(id.as_str()));
    record.extend(data);
    (id, record)
}

type Table = IndexMap<String, ValueMap>;

/// Process-local repository for tests and development
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records as-is, assigning ids where missing
    pub fn seed(&self, entity_type: &str, records: Vec<ValueMap>) -> Result<()> {
        for record in records {
            self.create(entity_type, record)?;
        }
        Ok(())
    }

    /// Number of records of a type
    pub fn count(&self, entity_type: &str) -> usize {
        self.tables
            .read()
            .map(|t| t.get(entity_type).map(Table::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Table>>> {
        self.tables
            .read()
            .map_err(|_| Error::Persistence("repository lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Table>>> {
        self.tables
            .write()
            .map_err(|_| Error::Persistence("repository lock poisoned".into()))
    }
}

impl Persistence for InMemoryRepository {
    fn create(&self, entity_type: &str, data: ValueMap) -> Result<ValueMap> {
        let (id, record) = with_record_id(data);
        self.write()?
            .entry(entity_type.to_string())
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    fn update(&self, entity_type: &str, id: &str, data: ValueMap) -> Result<ValueMap> {
        let mut tables = self.write()?;
        let table = tables.entry(entity_type.to_string()).or_default();
        let record = table.entry(id.to_string()).or_insert_with(|| {
            let mut fresh = ValueMap::new();
            fresh.insert("id".to_string(), Value::from(id));
            fresh
        });
        for (k, v) in data {
            if k != "id" {
                record.insert(k, v);
            }
        }
        Ok(record.clone())
    }

    fn delete(&self, entity_type: &str, id: &str) -> Result<bool> {
        Ok(self
            .write()?
            .get_mut(entity_type)
            .map(|table| table.shift_remove(id).is_some())
            .unwrap_or(false))
    }

    fn get(&self, entity_type: &str, id: &str) -> Result<Option<ValueMap>> {
        Ok(self
            .read()?
            .get(entity_type)
            .and_then(|table| table.get(id))
            .cloned())
    }

    fn list(&self, entity_type: &str) -> Result<Vec<ValueMap>> {
        Ok(self
            .read()?
            .get(entity_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }
}
