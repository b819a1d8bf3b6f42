//! Document store backends
//!
//! The sweep is generic over a `DocumentStore`: anything that can scan a
//! named collection, list its ids, and delete one record by id. The store
//! handle is passed explicitly into each sweep — there is no module-level
//! connection state — and dropping the handle releases the backend on every
//! exit path.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::SweepResult;

/// Raw, schema-less document as stored
pub type Document = serde_json::Value;

/// Minimal surface the sweep needs from a backend
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full scan of a collection. One independent read; callers must not
    /// assume any transaction spans consecutive calls.
    async fn scan(&self, collection: &str) -> SweepResult<Vec<Document>>;

    /// The set of ids present in a collection
    async fn ids(&self, collection: &str) -> SweepResult<HashSet<String>>;

    /// Delete a single record by identity. Deleting an id that no longer
    /// exists is not an error.
    async fn delete(&self, collection: &str, id: &str) -> SweepResult<()>;
}
