//! Schema file shapes

use almadar_core::OrbitalRegistration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// An application schema: a named list of orbitals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub orbitals: Vec<OrbitalRegistration>,
}

impl AppSchema {
    pub fn get(&self, name: &str) -> Option<&OrbitalRegistration> {
        self.orbitals.iter().find(|o| o.name == name)
    }

    /// Orbital names in load order
    pub fn names(&self) -> Vec<&str> {
        self.orbitals.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.orbitals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orbitals.is_empty()
    }
}

/// Encoding of a schema file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    Json,
    Ron,
}

impl SchemaFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::Json),
            "ron" => Some(Self::Ron),
            _ => None,
        }
    }
}
