//! Schema model, editing operations and persistence.
pub mod repository;
pub mod schema;
pub mod types;

pub use repository::{JsonFileRepository, MemoryRepository, RepositoryError, SchemaRepository};
pub use schema::{Schema, SchemaError};
pub use types::*;
