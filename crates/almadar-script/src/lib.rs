//! Almadar Script - orbital schema loader
//!
//! Loads orbital registrations from JSON or RON files:
//! - A single orbital per file, or
//! - An application file with an `orbitals` list
//!
//! Every registration is built once during loading so malformed traits and
//! expressions are reported here, before anything reaches a runtime.

mod error;
mod loader;
mod schema;

pub use error::{Error, Result};
pub use loader::Loader;
pub use schema::{AppSchema, SchemaFormat};
