//! Document Forge Core - Blueprint-Driven Document Rendering
//!
//! # The Working Rules
//! 1. Blueprints Are Contracts
//! 2. Validation Collects Everything
//! 3. Templates Are Reconciled, Not Trusted
//! 4. Images Bind By Filename, Never Twice By Id
//! 5. Metadata And Files Never Diverge
//! 6. Renderers Are Black Boxes

pub mod config;
pub mod convert;
pub mod engine;
pub mod hashing;
pub mod images;
pub mod library;
pub mod paths;
pub mod pipeline;
pub mod placeholders;
pub mod print;
pub mod reconcile;
pub mod schema;
pub mod store;
pub mod templates;
pub mod validation;

pub use config::{ConfigError, Delimiters, EngineConfig};
pub use convert::{flatten_for_substitution, ConvertError, FixedLayoutConverter, MarkupExtractor, SpreadsheetEngine};
pub use engine::{Command, CommandKind, EngineError, ImageRequest, InjectedImage, RenderCallbacks, TemplateEngine};
pub use hashing::{canonical_json, compute_job_hash, sha256_hex};
pub use images::{resolve_images, resolve_size, Attachment, ImageError, ImagePreset, ImageSize};
pub use library::{LibraryError, TemplateLibrary};
pub use paths::extract_field_paths;
pub use pipeline::{DocumentPipeline, GenerateRequest, Generator, PipelineError, RenderRequest, RenderedDocument};
pub use placeholders::{extract_references, AliasScope};
pub use print::PrintSpec;
pub use reconcile::{analyze, reconcile, PlaceholderStatus, ReconciliationReport};
pub use schema::{Blueprint, Schema, SchemaError, SchemaNode};
pub use store::{BlueprintStore, DirectoryFiles, MemoryStore, StoreError, TemplateFiles, TemplateStore};
pub use templates::{DocumentFormat, NewTemplate, TemplatePatch, TemplateRecord};
pub use validation::{ValidationError, ValidationResult, Validator, Violation, ViolationKind};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
