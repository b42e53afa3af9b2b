//! Runtime entity records
//!
//! The store holds records created by `spawn` and removed by `despawn`,
//! indexed by id and by entity type.

use crate::{Error, Result, Value, ValueMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A keyed runtime record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Unique identifier
    pub id: String,
    /// Entity type name (e.g., "Task")
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Dynamic fields
    pub fields: ValueMap,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            fields: ValueMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Flat object view: fields plus `id`
    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::with_capacity(self.fields.len() + 1);
        map.insert("id".to_string(), Value::from(self.id.as_str()));
        for (k, v) in &self.fields {
            if k != "id" {
                map.insert(k.clone(), v.clone());
            }
        }
        Value::Object(map)
    }
}

/// Storage for runtime entities
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    /// All records by id
    records: IndexMap<String, EntityRecord>,
    /// Index: type -> ids
    by_type: IndexMap<String, Vec<String>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; an `id` field is used as the key, otherwise a UUID is assigned
    pub fn spawn(&mut self, entity_type: impl Into<String>, mut fields: ValueMap) -> Result<String> {
        let id = match fields.shift_remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Int(id)) => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        if self.records.contains_key(&id) {
            return Err(Error::DuplicateRegistration(format!("entity {}", id)));
        }
        let entity_type = entity_type.into();
        self.by_type
            .entry(entity_type.clone())
            .or_default()
            .push(id.clone());
        self.records.insert(
            id.clone(),
            EntityRecord {
                id: id.clone(),
                entity_type,
                fields,
            },
        );
        Ok(id)
    }

    /// Merge fields into an existing record
    pub fn update(&mut self, id: &str, fields: ValueMap) -> Result<&EntityRecord> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::EntityNotFound(id.to_string()))?;
        for (k, v) in fields {
            if k != "id" {
                record.fields.insert(k, v);
            }
        }
        Ok(record)
    }

    pub fn remove(&mut self, id: &str) -> Option<EntityRecord> {
        let record = self.records.shift_remove(id)?;
        if let Some(ids) = self.by_type.get_mut(&record.entity_type) {
            ids.retain(|eid| eid != id);
        }
        Some(record)
    }

    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut EntityRecord> {
        self.records.get_mut(id)
    }

    /// All records of a type, in spawn order
    pub fn by_type<'a>(&'a self, entity_type: &str) -> impl Iterator<Item = &'a EntityRecord> + 'a {
        self.by_type
            .get(entity_type)
            .into_iter()
            .flat_map(|ids| ids.iter().filter_map(|id| self.records.get(id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, Value)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_record() {
        let mut record = EntityRecord::new("t1", "Task");
        record.set("title", "Write docs");
        assert_eq!(record.get("title").and_then(|v| v.as_str()), Some("Write docs"));
        assert_eq!(record.to_value().get_path(&["id"]), Value::from("t1"));
    }

    #[test]
    fn test_entity_store() {
        let mut store = EntityStore::new();

        let first = store
            .spawn("Task", fields(&[("title", Value::from("a"))]))
            .unwrap();
        let second = store
            .spawn("Task", fields(&[("id", Value::from("fixed"))]))
            .unwrap();
        store.spawn("Note", ValueMap::new()).unwrap();

        assert_eq!(second, "fixed");
        assert_eq!(store.len(), 3);
        assert_eq!(store.by_type("Task").count(), 2);
        assert_eq!(store.by_type("Note").count(), 1);
        assert_eq!(store.by_type("Missing").count(), 0);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
        assert!(store.get("fixed").unwrap().get("id").is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut store = EntityStore::new();
        store.spawn("Task", fields(&[("id", Value::from("x"))])).unwrap();
        let err = store.spawn("Task", fields(&[("id", Value::from("x"))]));
        assert!(matches!(err, Err(Error::DuplicateRegistration(_))));
    }

    #[test]
    fn test_update_and_remove() {
        let mut store = EntityStore::new();
        let id = store.spawn("Task", fields(&[("done", Value::Bool(false))])).unwrap();

        let updated = store.update(&id, fields(&[("done", Value::Bool(true))])).unwrap();
        assert_eq!(updated.get("done"), Some(&Value::Bool(true)));
        assert!(matches!(
            store.update("nope", ValueMap::new()),
            Err(Error::EntityNotFound(_))
        ));

        let removed = store.remove(&id).unwrap();
        assert_eq!(removed.entity_type, "Task");
        assert!(store.remove(&id).is_none());
        assert_eq!(store.by_type("Task").count(), 0);
    }
}
