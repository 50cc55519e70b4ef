//! Persistence for saved schemas.
//!
//! The engine never touches a repository; only the surrounding application
//! loads and saves through it.

use super::schema::Schema;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Schema store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Schema store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Saved schemas, keyed by schema id, in save order.
pub trait SchemaRepository {
    fn list(&self) -> Result<Vec<Schema>, RepositoryError>;

    fn get(&self, id: &str) -> Result<Option<Schema>, RepositoryError>;

    /// Inserts, or replaces the schema with the same id in place.
    fn save(&mut self, schema: &Schema) -> Result<(), RepositoryError>;

    /// Returns whether a schema was removed.
    fn delete(&mut self, id: &str) -> Result<bool, RepositoryError>;
}

fn upsert(schemas: &mut Vec<Schema>, schema: &Schema) {
    match schemas.iter_mut().find(|s| s.id == schema.id) {
        Some(slot) => *slot = schema.clone(),
        None => schemas.push(schema.clone()),
    }
}

fn remove(schemas: &mut Vec<Schema>, id: &str) -> bool {
    let before = schemas.len();
    schemas.retain(|s| s.id != id);
    schemas.len() != before
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    schemas: Vec<Schema>,
}

impl MemoryRepository {
    pub fn new() -> Self { Self::default() }
}

impl SchemaRepository for MemoryRepository {
    fn list(&self) -> Result<Vec<Schema>, RepositoryError> {
        Ok(self.schemas.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Schema>, RepositoryError> {
        Ok(self.schemas.iter().find(|s| s.id == id).cloned())
    }

    fn save(&mut self, schema: &Schema) -> Result<(), RepositoryError> {
        upsert(&mut self.schemas, schema);
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool, RepositoryError> {
        Ok(remove(&mut self.schemas, id))
    }
}

/// Every saved schema in one JSON array document. A missing file is an empty
/// store. Writes go through a temporary file in the same directory and are
/// renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path { &self.path }

    fn load(&self) -> Result<Vec<Schema>, RepositoryError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, schemas: &[Schema]) -> Result<(), RepositoryError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, schemas)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        tracing::debug!(path = %self.path.display(), count = schemas.len(), "schema store written");
        Ok(())
    }
}

impl SchemaRepository for JsonFileRepository {
    fn list(&self) -> Result<Vec<Schema>, RepositoryError> {
        self.load()
    }

    fn get(&self, id: &str) -> Result<Option<Schema>, RepositoryError> {
        Ok(self.load()?.into_iter().find(|s| s.id == id))
    }

    fn save(&mut self, schema: &Schema) -> Result<(), RepositoryError> {
        let mut schemas = self.load()?;
        upsert(&mut schemas, schema);
        self.store(&schemas)
    }

    fn delete(&mut self, id: &str) -> Result<bool, RepositoryError> {
        let mut schemas = self.load()?;
        let removed = remove(&mut schemas, id);
        if removed {
            self.store(&schemas)?;
        }
        Ok(removed)
    }
}
