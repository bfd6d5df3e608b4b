//! Template Records - Document Skeleton Metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type TemplateId = String;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unable to detect file format of '{0}'")]
    NoExtension(String),

    #[error("Unsupported format: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Docx,
    Pdf,
    Xlsx,
}

impl DocumentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Pdf => "pdf",
            Self::Xlsx => "xlsx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Pdf => "application/pdf",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    /// Detect from a filename extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Result<Self, FormatError> {
        match filename.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext.parse(),
            _ => Err(FormatError::NoExtension(filename.to_string())),
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docx" => Ok(Self::Docx),
            "pdf" => Ok(Self::Pdf),
            "xlsx" => Ok(Self::Xlsx),
            other => Err(FormatError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub blueprint_id: String,
    pub name: String,
    /// Name of the stored template file.
    pub filename: String,
    pub format: DocumentFormat,
    #[serde(default = "default_output_formats")]
    pub supported_output_formats: Vec<DocumentFormat>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, rename = "default")]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_output_formats() -> Vec<DocumentFormat> { vec![DocumentFormat::Pdf, DocumentFormat::Docx] }
fn default_language() -> String { "EN".to_string() }

/// Output formats a template of `format` offers unless told otherwise.
pub fn default_output_formats_for(format: DocumentFormat) -> Vec<DocumentFormat> {
    match format {
        DocumentFormat::Xlsx => vec![DocumentFormat::Xlsx],
        _ => default_output_formats(),
    }
}

impl TemplateRecord {
    pub fn supports(&self, format: DocumentFormat) -> bool {
        self.supported_output_formats.contains(&format)
    }
}

/// Caller-supplied fields of a template being created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub blueprint_id: String,
    pub name: String,
    #[serde(default, rename = "default")]
    pub is_default: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub supported_output_formats: Option<Vec<DocumentFormat>>,
}

impl NewTemplate {
    pub fn new(blueprint_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            blueprint_id: blueprint_id.into(),
            name: name.into(),
            is_default: false,
            language: default_language(),
            supported_output_formats: None,
        }
    }

    /// Build the record stored for this template.
    pub fn into_record(self, id: TemplateId, format: DocumentFormat, now: DateTime<Utc>) -> TemplateRecord {
        let filename = stored_filename(&self.name, format, now);
        let supported_output_formats = self
            .supported_output_formats
            .unwrap_or_else(|| default_output_formats_for(format));
        TemplateRecord {
            id,
            blueprint_id: self.blueprint_id,
            name: self.name,
            filename,
            format,
            supported_output_formats,
            language: self.language,
            is_default: self.is_default,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "default")]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub language: Option<String>,
}

/// `<name>-<millis>.<ext>`, with the name reduced to filename-safe characters.
pub fn stored_filename(name: &str, format: DocumentFormat, now: DateTime<Utc>) -> String {
    let safe: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let safe = if safe.is_empty() { "template".to_string() } else { safe };
    format!("{}-{}.{}", safe, now.timestamp_millis(), format.extension())
}
