//! Template Engine Boundary
//!
//! Byte-level template work is done by an external engine. This module fixes
//! the two capabilities the core needs from it: listing a template's commands
//! and rendering a template with data plus image callbacks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;
use thiserror::Error;

use crate::config::Delimiters;

#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct EngineError {
    pub context: String,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl EngineError {
    pub fn new(context: impl Into<String>, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Command types as the engine reports them. The upper-case aliases are the
/// engine's native tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    #[serde(alias = "FOR", alias = "FOR-EACH")]
    LoopStart,
    #[serde(alias = "END-FOR", alias = "END-FOR-EACH")]
    LoopEnd,
    #[serde(alias = "INS")]
    Insert,
    #[serde(alias = "IMAGE")]
    ImageInsert,
    #[serde(alias = "IF")]
    Conditional,
    #[serde(alias = "END-IF")]
    ConditionalEnd,
    #[serde(other)]
    Other,
}

/// One parsed template instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub code: String,
}

impl Command {
    pub fn new(kind: CommandKind, code: impl Into<String>) -> Self {
        Self { kind, code: code.into() }
    }

    pub fn loop_start(code: impl Into<String>) -> Self {
        Self::new(CommandKind::LoopStart, code)
    }

    pub fn insert(code: impl Into<String>) -> Self {
        Self::new(CommandKind::Insert, code)
    }

    pub fn image_insert(code: impl Into<String>) -> Self {
        Self::new(CommandKind::ImageInsert, code)
    }
}

/// Arguments of one image placeholder, as evaluated by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub id: String,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// What the engine places in the document for an image placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedImage {
    pub width: f64,
    pub height: f64,
    pub data: Vec<u8>,
    pub extension: String,
    pub caption: String,
}

/// Hooks the engine calls back into while rendering.
pub trait RenderCallbacks {
    /// `None` leaves the placeholder to the engine's own fallback.
    fn inject_image(&self, request: &ImageRequest) -> Option<InjectedImage>;

    /// Commands the engine cannot map (unknown keys) are reported here and
    /// must not abort the render.
    fn command_failed(&self, code: &str, error: &str) {
        tracing::debug!(code, error, "ignoring template command error");
    }
}

pub trait TemplateEngine: Send + Sync {
    fn list_commands(&self, template: &[u8], delimiters: &Delimiters) -> Result<Vec<Command>, EngineError>;

    fn render(
        &self,
        template: &[u8],
        data: &Value,
        delimiters: &Delimiters,
        callbacks: &dyn RenderCallbacks,
    ) -> Result<Vec<u8>, EngineError>;
}
