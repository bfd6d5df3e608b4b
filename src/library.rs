//! Template Library - Metadata And Files Kept In Step
//!
//! Every operation writes metadata first and the template file second. When
//! the file step fails, the metadata step is undone before the error is
//! returned.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::images::Attachment;
use crate::schema::Blueprint;
use crate::store::{BlueprintStore, MemoryStore, StoreError, TemplateFiles, TemplateStore};
use crate::templates::{
    default_output_formats_for, stored_filename, DocumentFormat, FormatError, NewTemplate, TemplatePatch,
    TemplateRecord,
};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl LibraryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

#[derive(Clone)]
pub struct TemplateLibrary {
    blueprints: Arc<dyn BlueprintStore>,
    templates: Arc<dyn TemplateStore>,
    files: Arc<dyn TemplateFiles>,
}

impl TemplateLibrary {
    pub fn new(
        blueprints: Arc<dyn BlueprintStore>,
        templates: Arc<dyn TemplateStore>,
        files: Arc<dyn TemplateFiles>,
    ) -> Self {
        Self { blueprints, templates, files }
    }

    /// Metadata in a fresh [`MemoryStore`], files in `files`.
    pub fn in_memory(files: Arc<dyn TemplateFiles>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, files)
    }

    pub fn blueprints(&self) -> &dyn BlueprintStore {
        self.blueprints.as_ref()
    }

    pub fn templates(&self) -> &dyn TemplateStore {
        self.templates.as_ref()
    }

    pub fn blueprint(&self, id: &str) -> Result<Blueprint, LibraryError> {
        Ok(self.blueprints.get_blueprint(id)?)
    }

    /// Record plus file bytes.
    pub fn load(&self, id: &str) -> Result<(TemplateRecord, Vec<u8>), LibraryError> {
        let record = self.templates.get_template(id)?;
        let bytes = self.files.read(&record.filename)?;
        Ok((record, bytes))
    }

    pub fn create(&self, new: NewTemplate, upload: &Attachment) -> Result<TemplateRecord, LibraryError> {
        self.blueprints.get_blueprint(&new.blueprint_id)?;
        let format = DocumentFormat::from_filename(&upload.original_filename)?;

        let record = new.into_record(Uuid::new_v4().to_string(), format, Utc::now());
        let demoted = if record.is_default {
            self.take_defaults(&record.blueprint_id)?
        } else {
            vec![]
        };

        let created = match self.templates.create_template(record) {
            Ok(created) => created,
            Err(e) => {
                self.restore_defaults(demoted);
                return Err(e.into());
            }
        };

        if let Err(e) = self.files.write(&created.filename, &upload.data) {
            warn!(id = %created.id, error = %e, "template file write failed, rolling back metadata");
            if let Err(rollback) = self.templates.delete_template(&created.id) {
                warn!(id = %created.id, error = %rollback, "metadata rollback failed");
            }
            self.restore_defaults(demoted);
            return Err(e.into());
        }

        info!(id = %created.id, filename = %created.filename, "template created");
        Ok(created)
    }

    /// Apply `patch`, and replace the file when `upload` is given. A rename
    /// without a new file renames the stored file to match.
    pub fn update(
        &self,
        id: &str,
        patch: TemplatePatch,
        upload: Option<&Attachment>,
    ) -> Result<TemplateRecord, LibraryError> {
        let current = self.templates.get_template(id)?;
        let now = Utc::now();

        let mut next = current.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(language) = patch.language {
            next.language = language;
        }
        if let Some(is_default) = patch.is_default {
            next.is_default = is_default;
        }
        next.updated_at = now;

        if let Some(upload) = upload {
            let format = DocumentFormat::from_filename(&upload.original_filename)?;
            if format != current.format {
                next.supported_output_formats = default_output_formats_for(format);
            }
            next.format = format;
            next.filename = stored_filename(&next.name, format, now);
        } else if next.name != current.name {
            next.filename = stored_filename(&next.name, next.format, now);
        }

        let demoted = if next.is_default && !current.is_default {
            self.take_defaults(&current.blueprint_id)?
        } else {
            vec![]
        };

        let updated = match self.templates.update_template(next) {
            Ok(updated) => updated,
            Err(e) => {
                self.restore_defaults(demoted);
                return Err(e.into());
            }
        };

        let file_step = match upload {
            Some(upload) => self.files.write(&updated.filename, &upload.data),
            None if updated.filename != current.filename => self.files.rename(&current.filename, &updated.filename),
            None => Ok(()),
        };

        if let Err(e) = file_step {
            warn!(%id, error = %e, "template file step failed, restoring metadata");
            if let Err(rollback) = self.templates.update_template(current) {
                warn!(%id, error = %rollback, "metadata rollback failed");
            }
            self.restore_defaults(demoted);
            return Err(e.into());
        }

        if upload.is_some() && updated.filename != current.filename {
            if let Err(e) = self.files.delete(&current.filename) {
                warn!(%id, filename = %current.filename, error = %e, "failed to remove replaced template file");
            }
        }

        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<TemplateRecord, LibraryError> {
        let record = self.templates.delete_template(id)?;
        self.files.delete(&record.filename)?;
        info!(%id, "template deleted");
        Ok(record)
    }

    /// Deletes the blueprint with all of its templates and their files.
    pub fn delete_blueprint(&self, id: &str) -> Result<Blueprint, LibraryError> {
        self.blueprints.get_blueprint(id)?;
        for template in self.templates.templates_for_blueprint(id)? {
            self.delete(&template.id)?;
        }
        Ok(self.blueprints.delete_blueprint(id)?)
    }

    fn take_defaults(&self, blueprint_id: &str) -> Result<Vec<TemplateRecord>, StoreError> {
        let defaults: Vec<_> = self
            .templates
            .templates_for_blueprint(blueprint_id)?
            .into_iter()
            .filter(|t| t.is_default)
            .collect();
        self.templates.unset_default_templates(blueprint_id)?;
        Ok(defaults)
    }

    fn restore_defaults(&self, demoted: Vec<TemplateRecord>) {
        for record in demoted {
            if let Err(e) = self.templates.update_template(record) {
                warn!(error = %e, "failed to restore default template flag");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaNode;
    use crate::store::DirectoryFiles;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Files that refuse writes and renames while `broken` is set.
    struct FlakyFiles {
        inner: Option<DirectoryFiles>,
        broken: AtomicBool,
    }

    impl FlakyFiles {
        fn broken() -> Self {
            Self { inner: None, broken: AtomicBool::new(true) }
        }

        fn failure(filename: &str) -> StoreError {
            StoreError::Io {
                filename: filename.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            }
        }
    }

    impl TemplateFiles for FlakyFiles {
        fn write(&self, filename: &str, data: &[u8]) -> Result<(), StoreError> {
            match &self.inner {
                Some(inner) if !self.broken.load(Ordering::SeqCst) => inner.write(filename, data),
                _ => Err(Self::failure(filename)),
            }
        }

        fn read(&self, filename: &str) -> Result<Vec<u8>, StoreError> {
            match &self.inner {
                Some(inner) => inner.read(filename),
                None => Err(StoreError::not_found("Template file", filename)),
            }
        }

        fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
            match &self.inner {
                Some(inner) if !self.broken.load(Ordering::SeqCst) => inner.rename(from, to),
                _ => Err(Self::failure(from)),
            }
        }

        fn delete(&self, filename: &str) -> Result<(), StoreError> {
            match &self.inner {
                Some(inner) => inner.delete(filename),
                None => Ok(()),
            }
        }
    }

    fn blueprint() -> Blueprint {
        Blueprint {
            id: "bp-1".to_string(),
            name: "cv".to_string(),
            description: String::new(),
            schema: [("name".to_string(), SchemaNode::text(true))].into_iter().collect(),
        }
    }

    fn library(files: Arc<dyn TemplateFiles>) -> TemplateLibrary {
        let library = TemplateLibrary::in_memory(files);
        library.blueprints().create_blueprint(blueprint()).unwrap();
        library
    }

    fn docx(name: &str, data: &[u8]) -> Attachment {
        Attachment::new(name, "application/octet-stream", data.to_vec())
    }

    #[test]
    fn test_create_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(Arc::new(DirectoryFiles::new(dir.path()).unwrap()));

        let record = library.create(NewTemplate::new("bp-1", "Main CV"), &docx("cv.docx", b"PK")).unwrap();
        assert_eq!(record.format, DocumentFormat::Docx);
        assert!(record.filename.starts_with("Main-CV-"));

        let (loaded, bytes) = library.load(&record.id).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(bytes, b"PK");
    }

    #[test]
    fn test_create_rolls_back_on_write_failure() {
        let library = library(Arc::new(FlakyFiles::broken()));

        let err = library.create(NewTemplate::new("bp-1", "cv"), &docx("cv.docx", b"PK")).unwrap_err();
        assert!(matches!(err, LibraryError::Store(StoreError::Io { .. })));
        assert!(library.templates().list_templates().unwrap().is_empty());
    }

    #[test]
    fn test_create_requires_known_blueprint_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(Arc::new(DirectoryFiles::new(dir.path()).unwrap()));

        assert!(library
            .create(NewTemplate::new("nope", "cv"), &docx("cv.docx", b"PK"))
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            library.create(NewTemplate::new("bp-1", "cv"), &docx("cv.odt", b"PK")),
            Err(LibraryError::Format(FormatError::Unsupported(_)))
        ));
    }

    #[test]
    fn test_new_default_demotes_previous_and_restores_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(FlakyFiles {
            inner: Some(DirectoryFiles::new(dir.path()).unwrap()),
            broken: AtomicBool::new(false),
        });
        let library = library(files.clone());

        let mut first = NewTemplate::new("bp-1", "first");
        first.is_default = true;
        let first = library.create(first, &docx("a.docx", b"1")).unwrap();

        let mut second = NewTemplate::new("bp-1", "second");
        second.is_default = true;
        files.broken.store(true, Ordering::SeqCst);
        library.create(second.clone(), &docx("b.docx", b"2")).unwrap_err();
        assert!(library.templates().get_template(&first.id).unwrap().is_default);

        files.broken.store(false, Ordering::SeqCst);
        let second = library.create(second, &docx("b.docx", b"2")).unwrap();
        assert!(!library.templates().get_template(&first.id).unwrap().is_default);
        assert!(library.templates().get_template(&second.id).unwrap().is_default);
    }

    #[test]
    fn test_rename_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(Arc::new(DirectoryFiles::new(dir.path()).unwrap()));
        let record = library.create(NewTemplate::new("bp-1", "old"), &docx("cv.docx", b"PK")).unwrap();

        let patch = TemplatePatch { name: Some("new".to_string()), ..Default::default() };
        let updated = library.update(&record.id, patch, None).unwrap();
        assert!(updated.filename.starts_with("new-"));
        assert!(!dir.path().join(&record.filename).exists());
        assert_eq!(library.load(&record.id).unwrap().1, b"PK");
    }

    #[test]
    fn test_failed_rename_restores_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(FlakyFiles {
            inner: Some(DirectoryFiles::new(dir.path()).unwrap()),
            broken: AtomicBool::new(false),
        });
        let library = library(files.clone());
        let record = library.create(NewTemplate::new("bp-1", "old"), &docx("cv.docx", b"PK")).unwrap();

        files.broken.store(true, Ordering::SeqCst);
        let patch = TemplatePatch { name: Some("new".to_string()), ..Default::default() };
        library.update(&record.id, patch, None).unwrap_err();
        assert_eq!(library.templates().get_template(&record.id).unwrap(), record);
    }

    #[test]
    fn test_failed_replace_restores_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(FlakyFiles {
            inner: Some(DirectoryFiles::new(dir.path()).unwrap()),
            broken: AtomicBool::new(false),
        });
        let library = library(files.clone());
        let record = library.create(NewTemplate::new("bp-1", "report"), &docx("r.docx", b"v1")).unwrap();

        files.broken.store(true, Ordering::SeqCst);
        let patch = TemplatePatch { name: Some("renamed".to_string()), ..Default::default() };
        let err = library.update(&record.id, patch, Some(&docx("r.xlsx", b"v2"))).unwrap_err();
        assert!(matches!(err, LibraryError::Store(StoreError::Io { .. })));

        assert_eq!(library.templates().get_template(&record.id).unwrap(), record);
        assert_eq!(library.load(&record.id).unwrap().1, b"v1");
    }

    #[test]
    fn test_replace_file_switches_format() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(Arc::new(DirectoryFiles::new(dir.path()).unwrap()));
        let record = library.create(NewTemplate::new("bp-1", "report"), &docx("r.docx", b"v1")).unwrap();

        let updated = library
            .update(&record.id, TemplatePatch::default(), Some(&docx("r.xlsx", b"v2")))
            .unwrap();
        assert_eq!(updated.format, DocumentFormat::Xlsx);
        assert_eq!(updated.supported_output_formats, vec![DocumentFormat::Xlsx]);
        assert_eq!(library.load(&record.id).unwrap().1, b"v2");
        assert!(!dir.path().join(&record.filename).exists());
    }

    #[test]
    fn test_delete_blueprint_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(Arc::new(DirectoryFiles::new(dir.path()).unwrap()));
        let a = library.create(NewTemplate::new("bp-1", "a"), &docx("a.docx", b"1")).unwrap();
        let b = library.create(NewTemplate::new("bp-1", "b"), &docx("b.docx", b"2")).unwrap();

        library.delete_blueprint("bp-1").unwrap();
        assert!(library.templates().list_templates().unwrap().is_empty());
        assert!(!dir.path().join(&a.filename).exists());
        assert!(!dir.path().join(&b.filename).exists());
        assert!(library.blueprint("bp-1").unwrap_err().is_not_found());
    }
}
