//! Persistence Contracts - Blueprint, Template and File Stores
//!
//! The core reaches durable state only through these traits. `MemoryStore`
//! and `DirectoryFiles` are the bundled implementations.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::schema::Blueprint;
use crate::templates::TemplateRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid template filename: '{0}'")]
    InvalidFilename(String),

    #[error("Template file operation failed on {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store unavailable: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub trait BlueprintStore: Send + Sync {
    /// Stores the blueprint, assigning an id when it has none.
    fn create_blueprint(&self, blueprint: Blueprint) -> Result<Blueprint, StoreError>;
    fn get_blueprint(&self, id: &str) -> Result<Blueprint, StoreError>;
    fn list_blueprints(&self) -> Result<Vec<Blueprint>, StoreError>;
    fn update_blueprint(&self, blueprint: Blueprint) -> Result<Blueprint, StoreError>;
    fn delete_blueprint(&self, id: &str) -> Result<Blueprint, StoreError>;
}

pub trait TemplateStore: Send + Sync {
    fn create_template(&self, record: TemplateRecord) -> Result<TemplateRecord, StoreError>;
    fn get_template(&self, id: &str) -> Result<TemplateRecord, StoreError>;
    fn list_templates(&self) -> Result<Vec<TemplateRecord>, StoreError>;
    fn templates_for_blueprint(&self, blueprint_id: &str) -> Result<Vec<TemplateRecord>, StoreError>;
    /// Replaces the stored record with the same id.
    fn update_template(&self, record: TemplateRecord) -> Result<TemplateRecord, StoreError>;
    fn delete_template(&self, id: &str) -> Result<TemplateRecord, StoreError>;
    fn unset_default_templates(&self, blueprint_id: &str) -> Result<(), StoreError>;
}

/// Binary template files, addressed by stored filename.
pub trait TemplateFiles: Send + Sync {
    fn write(&self, filename: &str, data: &[u8]) -> Result<(), StoreError>;
    fn read(&self, filename: &str) -> Result<Vec<u8>, StoreError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError>;
    /// Deleting a missing file is not an error.
    fn delete(&self, filename: &str) -> Result<(), StoreError>;
}

// --- In-memory metadata ---

#[derive(Debug, Default)]
pub struct MemoryStore {
    blueprints: RwLock<HashMap<String, Blueprint>>,
    templates: RwLock<HashMap<String, TemplateRecord>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read().map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write().map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` blueprint in `dir`. Unreadable or invalid files
    /// are skipped with a warning.
    pub fn load_blueprints_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let store = Self::new();
        if !dir.exists() {
            return Ok(store);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| Blueprint::from_json(&content).map_err(|e| e.to_string()));

            match parsed {
                Ok(mut blueprint) => {
                    if blueprint.id.is_empty() {
                        blueprint.id = path
                            .file_stem()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_default();
                    }
                    if let Ok(mut map) = store.blueprints.write() {
                        map.insert(blueprint.id.clone(), blueprint);
                    }
                }
                Err(error) => warn!(path = %path.display(), %error, "skipping blueprint file"),
            }
        }
        Ok(store)
    }
}

impl BlueprintStore for MemoryStore {
    fn create_blueprint(&self, mut blueprint: Blueprint) -> Result<Blueprint, StoreError> {
        if blueprint.id.is_empty() {
            blueprint.id = Uuid::new_v4().to_string();
        }
        write(&self.blueprints)?.insert(blueprint.id.clone(), blueprint.clone());
        Ok(blueprint)
    }

    fn get_blueprint(&self, id: &str) -> Result<Blueprint, StoreError> {
        read(&self.blueprints)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Blueprint", id))
    }

    fn list_blueprints(&self) -> Result<Vec<Blueprint>, StoreError> {
        let mut all: Vec<_> = read(&self.blueprints)?.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    fn update_blueprint(&self, blueprint: Blueprint) -> Result<Blueprint, StoreError> {
        let mut map = write(&self.blueprints)?;
        match map.get_mut(&blueprint.id) {
            Some(slot) => {
                *slot = blueprint.clone();
                Ok(blueprint)
            }
            None => Err(StoreError::not_found("Blueprint", &blueprint.id)),
        }
    }

    fn delete_blueprint(&self, id: &str) -> Result<Blueprint, StoreError> {
        write(&self.blueprints)?
            .remove(id)
            .ok_or_else(|| StoreError::not_found("Blueprint", id))
    }
}

impl TemplateStore for MemoryStore {
    fn create_template(&self, mut record: TemplateRecord) -> Result<TemplateRecord, StoreError> {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        write(&self.templates)?.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn get_template(&self, id: &str) -> Result<TemplateRecord, StoreError> {
        read(&self.templates)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Template", id))
    }

    fn list_templates(&self) -> Result<Vec<TemplateRecord>, StoreError> {
        let mut all: Vec<_> = read(&self.templates)?.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        Ok(all)
    }

    fn templates_for_blueprint(&self, blueprint_id: &str) -> Result<Vec<TemplateRecord>, StoreError> {
        Ok(self
            .list_templates()?
            .into_iter()
            .filter(|t| t.blueprint_id == blueprint_id)
            .collect())
    }

    fn update_template(&self, record: TemplateRecord) -> Result<TemplateRecord, StoreError> {
        let mut map = write(&self.templates)?;
        match map.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(record)
            }
            None => Err(StoreError::not_found("Template", &record.id)),
        }
    }

    fn delete_template(&self, id: &str) -> Result<TemplateRecord, StoreError> {
        write(&self.templates)?
            .remove(id)
            .ok_or_else(|| StoreError::not_found("Template", id))
    }

    fn unset_default_templates(&self, blueprint_id: &str) -> Result<(), StoreError> {
        write(&self.templates)?
            .values_mut()
            .filter(|t| t.blueprint_id == blueprint_id)
            .for_each(|t| t.is_default = false);
        Ok(())
    }
}

// --- Template files on disk ---

/// Template files stored flat under one directory.
#[derive(Debug, Clone)]
pub struct DirectoryFiles {
    root: PathBuf,
}

impl DirectoryFiles {
    /// Creates `root` if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            filename: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, filename: &str) -> Result<PathBuf, StoreError> {
        let invalid = filename.is_empty()
            || filename == "."
            || filename.contains("..")
            || filename.contains('/')
            || filename.contains('\\');
        if invalid {
            return Err(StoreError::InvalidFilename(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }
}

fn io_error(filename: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        filename: filename.to_string(),
        source,
    }
}

impl TemplateFiles for DirectoryFiles {
    /// Written to a temporary file first, then moved into place.
    fn write(&self, filename: &str, data: &[u8]) -> Result<(), StoreError> {
        let target = self.path(filename)?;
        let mut staged = tempfile::NamedTempFile::new_in(&self.root).map_err(io_error(filename))?;
        staged.write_all(data).map_err(io_error(filename))?;
        staged.persist(&target).map_err(|e| io_error(filename)(e.error))?;
        Ok(())
    }

    fn read(&self, filename: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(filename)?;
        fs::read(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => StoreError::not_found("Template file", filename),
            _ => StoreError::Io {
                filename: filename.to_string(),
                source,
            },
        })
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let source = self.path(from)?;
        let target = self.path(to)?;
        fs::rename(source, target).map_err(io_error(from))
    }

    fn delete(&self, filename: &str) -> Result<(), StoreError> {
        let path = self.path(filename)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(filename)(e)),
        }
    }
}
