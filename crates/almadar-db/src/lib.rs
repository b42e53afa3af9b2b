//! Almadar DB - entity record persistence using native_db
//!
//! [`Store`] implements [`almadar_core::Persistence`], so a runtime built
//! with it keeps `persist`/`fetch` records and `ENTITY_*` bridge writes on
//! disk (or in an in-memory native_db database for tests).

mod error;
mod models;
mod store;

pub use error::{Error, Result};
pub use models::StoredRecord;
pub use store::Store;
