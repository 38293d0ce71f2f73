//! Persistence layer: repository trait, SQLite backend, and schema.

mod schema;
mod sqlite;
mod traits;

pub use schema::{initialize_schema, SCHEMA_SQL};
pub use sqlite::SqliteStore;
pub use traits::{Repository, StoreError, StoreResult};

use std::sync::{Arc, Mutex};

/// Shared handle to the store used across tasks
pub type SharedStore = Arc<Mutex<SqliteStore>>;

/// Wraps a store for shared use
pub fn shared(store: SqliteStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}
