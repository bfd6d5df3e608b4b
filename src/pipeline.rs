//! Rendering Pipeline - Single Entry Point
//!
//! CRITICAL: validate_and_render MUST call validate internally. No bypass.
//! Validation and image-id checks run before any renderer or converter work.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::convert::{flatten_for_substitution, ConvertError, FixedLayoutConverter, MarkupExtractor, SpreadsheetEngine};
use crate::engine::{EngineError, TemplateEngine};
use crate::hashing::{compute_job_hash, sha256_hex};
use crate::images::{resolve_images, Attachment, ImageError, ImageIndex};
use crate::library::{LibraryError, TemplateLibrary};
use crate::reconcile::{self, ReconciliationReport};
use crate::schema::{Payload, Schema};
use crate::store::StoreError;
use crate::templates::{DocumentFormat, FormatError};
use crate::validation::{ValidationError, ValidationResult, Validator, Violation};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Images(#[from] ImageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Template rendering failed: {0}")]
    Render(#[from] EngineError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("A {template} template cannot produce {requested} output")]
    UnsupportedOutputFormat {
        template: DocumentFormat,
        requested: DocumentFormat,
    },

    #[error("Only docx templates can be analyzed, got {0}")]
    UnsupportedTemplateFormat(DocumentFormat),

    #[error("No {0} configured")]
    MissingAdapter(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LibraryError> for PipelineError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::Store(e) => Self::Store(e),
            LibraryError::Format(e) => Self::Format(e),
        }
    }
}

impl PipelineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }

    /// The full violation list of a validation failure.
    pub fn violations(&self) -> Option<&[Violation]> {
        match self {
            Self::Validation(e) => Some(&e.violations),
            _ => None,
        }
    }
}

/// Everything one render needs, already loaded.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// Identifies the template in the job hash.
    pub template_id: &'a str,
    pub schema: &'a Schema,
    pub payload: &'a Payload,
    pub attachments: &'a [Attachment],
    pub template: &'a [u8],
    pub template_format: DocumentFormat,
    pub output_format: DocumentFormat,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedDocument {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
    pub content_type: &'static str,
    pub size: usize,
    pub sha256: String,
    pub job_hash: String,
    pub engine_version: &'static str,
}

/// The rendering pipeline - single entry point for all document output
pub struct DocumentPipeline {
    engine: Box<dyn TemplateEngine>,
    markup: Option<Box<dyn MarkupExtractor>>,
    spreadsheet: Option<Box<dyn SpreadsheetEngine>>,
    converter: FixedLayoutConverter,
    validator: Validator,
    config: EngineConfig,
}

impl DocumentPipeline {
    pub fn new(engine: Box<dyn TemplateEngine>, config: EngineConfig) -> Self {
        let converter = FixedLayoutConverter::new(config.browser.clone(), config.print.clone());
        Self {
            engine,
            markup: None,
            spreadsheet: None,
            converter,
            validator: Validator::new(),
            config,
        }
    }

    pub fn with_markup(mut self, markup: Box<dyn MarkupExtractor>) -> Self {
        self.markup = Some(markup);
        self
    }

    pub fn with_spreadsheet(mut self, spreadsheet: Box<dyn SpreadsheetEngine>) -> Self {
        self.spreadsheet = Some(spreadsheet);
        self
    }

    pub fn with_converter(mut self, converter: FixedLayoutConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a payload against a schema
    ///
    /// This is the ONLY validation entry point.
    pub fn validate(&self, schema: &Schema, payload: &Payload, attachments: &[Attachment]) -> ValidationResult {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        self.validator.check(schema, payload, attachments)
    }

    /// Render a document
    ///
    /// CRITICAL: This ALWAYS calls validate internally. No bypass possible.
    pub fn validate_and_render(&self, request: &RenderRequest<'_>) -> Result<RenderedDocument, PipelineError> {
        // MANDATORY: Validation is always called. This is non-negotiable.
        self.validate(request.schema, request.payload, request.attachments)
            .into_result()?;

        let images = ImageIndex::new(resolve_images(request.payload, request.attachments)?);
        debug!(images = images.len(), "payload validated, images bound");

        let bytes = match (request.template_format, request.output_format) {
            (DocumentFormat::Docx, DocumentFormat::Docx) => self.render_docx(request, &images)?,
            (DocumentFormat::Docx, DocumentFormat::Pdf) => {
                let markup = self.markup.as_ref().ok_or(PipelineError::MissingAdapter("markup extractor"))?;
                let document = self.render_docx(request, &images)?;
                let html = markup.to_html(&document).map_err(ConvertError::Markup)?;
                self.converter.convert(&html)?
            }
            (DocumentFormat::Xlsx, DocumentFormat::Xlsx) => {
                let spreadsheet = self
                    .spreadsheet
                    .as_ref()
                    .ok_or(PipelineError::MissingAdapter("spreadsheet engine"))?;
                let data = flatten_for_substitution(&Value::Object(request.payload.clone()));
                spreadsheet
                    .substitute(request.template, self.config.spreadsheet_sheet, &data)
                    .map_err(ConvertError::Spreadsheet)?
            }
            (template, requested) => return Err(PipelineError::UnsupportedOutputFormat { template, requested }),
        };

        let document = RenderedDocument {
            format: request.output_format,
            content_type: request.output_format.content_type(),
            size: bytes.len(),
            sha256: sha256_hex(&bytes),
            job_hash: compute_job_hash(request.template_id, request.output_format, request.payload)?,
            engine_version: ENGINE_VERSION,
            bytes,
        };

        info!(
            template_id = request.template_id,
            format = %document.format,
            size = document.size,
            job_hash = %document.job_hash,
            "document rendered"
        );
        Ok(document)
    }

    /// Reconcile a docx template's references with a schema.
    pub fn analyze(&self, template: &[u8], schema: &Schema) -> Result<ReconciliationReport, PipelineError> {
        Ok(reconcile::analyze(self.engine.as_ref(), template, schema, &self.config.delimiters)?)
    }

    fn render_docx(&self, request: &RenderRequest<'_>, images: &ImageIndex) -> Result<Vec<u8>, EngineError> {
        let data = Value::Object(request.payload.clone());
        self.engine.render(request.template, &data, &self.config.delimiters, images)
    }
}

/// A render addressed by stored ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub blueprint_id: String,
    pub template_id: String,
    pub output_format: DocumentFormat,
    pub data: Payload,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Store-backed entry points over a [`DocumentPipeline`].
pub struct Generator {
    library: TemplateLibrary,
    pipeline: DocumentPipeline,
}

impl Generator {
    pub fn new(library: TemplateLibrary, pipeline: DocumentPipeline) -> Self {
        Self { library, pipeline }
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    pub fn pipeline(&self) -> &DocumentPipeline {
        &self.pipeline
    }

    pub fn generate(&self, request: &GenerateRequest) -> Result<RenderedDocument, PipelineError> {
        let blueprint = self.library.blueprint(&request.blueprint_id)?;
        let (record, template) = self.library.load(&request.template_id)?;

        if record.blueprint_id != blueprint.id {
            return Err(StoreError::not_found("Template", &request.template_id).into());
        }
        if !record.supports(request.output_format) {
            return Err(PipelineError::UnsupportedOutputFormat {
                template: record.format,
                requested: request.output_format,
            });
        }

        self.pipeline.validate_and_render(&RenderRequest {
            template_id: &record.id,
            schema: &blueprint.schema,
            payload: &request.data,
            attachments: &request.attachments,
            template: &template,
            template_format: record.format,
            output_format: request.output_format,
        })
    }

    pub fn analyze(&self, template_id: &str) -> Result<ReconciliationReport, PipelineError> {
        let (record, template) = self.library.load(template_id)?;
        if record.format != DocumentFormat::Docx {
            return Err(PipelineError::UnsupportedTemplateFormat(record.format));
        }
        let blueprint = self.library.blueprint(&record.blueprint_id)?;
        self.pipeline.analyze(&template, &blueprint.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Delimiters;
    use crate::engine::{Command, RenderCallbacks};
    use crate::schema::SchemaNode;
    use serde_json::json;

    /// Echoes the data it was given as the "document".
    struct EchoEngine;

    impl TemplateEngine for EchoEngine {
        fn list_commands(&self, _: &[u8], _: &Delimiters) -> Result<Vec<Command>, EngineError> {
            Ok(vec![Command::insert("title")])
        }

        fn render(&self, _: &[u8], data: &Value, _: &Delimiters, _: &dyn RenderCallbacks) -> Result<Vec<u8>, EngineError> {
            Ok(serde_json::to_vec(data).map_err(|e| EngineError::new("encode", e))?)
        }
    }

    struct EchoSheet;

    impl SpreadsheetEngine for EchoSheet {
        fn substitute(&self, _: &[u8], sheet: usize, data: &Value) -> Result<Vec<u8>, EngineError> {
            Ok(format!("sheet{sheet}:{data}").into_bytes())
        }
    }

    fn schema() -> Schema {
        [("title".to_string(), SchemaNode::text(true))].into_iter().collect()
    }

    fn request<'a>(schema: &'a Schema, payload: &'a Payload, template: DocumentFormat, output: DocumentFormat) -> RenderRequest<'a> {
        RenderRequest {
            template_id: "t-1",
            schema,
            payload,
            attachments: &[],
            template: b"tpl",
            template_format: template,
            output_format: output,
        }
    }

    #[test]
    fn test_docx_passthrough() {
        let pipeline = DocumentPipeline::new(Box::new(EchoEngine), EngineConfig::default());
        let schema = schema();
        let payload = json!({"title": "Q3"}).as_object().cloned().unwrap();

        let doc = pipeline
            .validate_and_render(&request(&schema, &payload, DocumentFormat::Docx, DocumentFormat::Docx))
            .unwrap();
        assert_eq!(doc.bytes, br#"{"title":"Q3"}"#);
        assert_eq!(doc.sha256, sha256_hex(&doc.bytes));
        assert_eq!(doc.content_type, DocumentFormat::Docx.content_type());
    }

    #[test]
    fn test_spreadsheet_gets_flattened_data() {
        let pipeline = DocumentPipeline::new(Box::new(EchoEngine), EngineConfig::default())
            .with_spreadsheet(Box::new(EchoSheet));
        let schema: Schema = [
            ("title".to_string(), SchemaNode::text(true)),
            ("rows".to_string(), SchemaNode::collection(false, SchemaNode::text(false))),
        ]
        .into_iter()
        .collect();
        let payload = json!({"title": "Q3", "rows": {"items": ["a", "b"]}}).as_object().cloned().unwrap();

        let doc = pipeline
            .validate_and_render(&request(&schema, &payload, DocumentFormat::Xlsx, DocumentFormat::Xlsx))
            .unwrap();
        assert_eq!(String::from_utf8(doc.bytes).unwrap(), r#"sheet1:{"rows":["a","b"],"title":"Q3"}"#);
    }

    #[test]
    fn test_unsupported_routes() {
        let pipeline = DocumentPipeline::new(Box::new(EchoEngine), EngineConfig::default());
        let schema = schema();
        let payload = json!({"title": "Q3"}).as_object().cloned().unwrap();

        let err = pipeline
            .validate_and_render(&request(&schema, &payload, DocumentFormat::Xlsx, DocumentFormat::Pdf))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedOutputFormat { .. }));

        let err = pipeline
            .validate_and_render(&request(&schema, &payload, DocumentFormat::Docx, DocumentFormat::Pdf))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingAdapter("markup extractor")));
    }

    #[test]
    fn test_validation_error_keeps_violations() {
        let pipeline = DocumentPipeline::new(Box::new(EchoEngine), EngineConfig::default());
        let schema = schema();
        let payload = Payload::new();

        let err = pipeline
            .validate_and_render(&request(&schema, &payload, DocumentFormat::Docx, DocumentFormat::Docx))
            .unwrap_err();
        assert_eq!(err.violations().map(|v| v.len()), Some(1));
    }

    #[test]
    fn test_analyze_through_engine() {
        let pipeline = DocumentPipeline::new(Box::new(EchoEngine), EngineConfig::default());
        let report = pipeline.analyze(b"tpl", &schema()).unwrap();
        assert!(report.is_complete());
    }
}
