//! Entity record model for database storage.

use crate::error::Result;
use almadar_core::ValueMap;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

/// Stored entity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct StoredRecord {
    /// Primary key - `entity_type:id`.
    #[primary_key]
    pub key: String,
    /// Entity type.
    #[secondary_key]
    pub entity_type: String,
    /// Record id within its type.
    pub id: String,
    /// bincode-encoded fields, `id` included.
    pub fields: Vec<u8>,
}

impl StoredRecord {
    /// Primary key for a record.
    pub fn key(entity_type: &str, id: &str) -> String {
        format!("{}:{}", entity_type, id)
    }

    /// Encode a record.
    pub fn from_fields(entity_type: &str, id: &str, fields: &ValueMap) -> Result<Self> {
        Ok(Self {
            key: Self::key(entity_type, id),
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            fields: bincode::serialize(fields)?,
        })
    }

    /// Decode the stored fields.
    pub fn to_fields(&self) -> Result<ValueMap> {
        Ok(bincode::deserialize(&self.fields)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almadar_core::Value;

    #[test]
    fn test_fields_survive_encoding() {
        let mut fields = ValueMap::new();
        fields.insert("id".into(), Value::from("a"));
        fields.insert("score".into(), Value::Float(1.5));
        fields.insert("tags".into(), Value::Array(vec![Value::from("x"), Value::Null]));

        let stored = StoredRecord::from_fields("Task", "a", &fields).unwrap();
        assert_eq!(stored.key, "Task:a");
        assert_eq!(stored.to_fields().unwrap(), fields);
    }
}
