//! Blueprint Schema - The Declared Shape Of A Payload
//!
//! A collection declares ONE entry node that every entry must satisfy.
//! Per-position entry schemas are rejected when the blueprint is parsed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Named schema nodes, keyed by field name.
pub type Schema = BTreeMap<String, SchemaNode>;

/// The data a caller wants inserted into a template.
pub type Payload = Map<String, Value>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("object node is missing 'fields'")]
    MissingFields,

    #[error("collection node is missing 'items'")]
    MissingItems,

    #[error("Invalid blueprint JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub enum SchemaNode {
    Text { required: bool },
    Object { required: bool, fields: Schema },
    Collection { required: bool, items: Box<SchemaNode> },
    Image { required: bool },
    /// A `type` tag this engine does not know. Kept so validation can report it.
    Unknown { type_name: String, required: bool },
}

impl SchemaNode {
    pub fn text(required: bool) -> Self {
        Self::Text { required }
    }

    pub fn image(required: bool) -> Self {
        Self::Image { required }
    }

    pub fn object<K, I>(required: bool, fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaNode)>,
    {
        Self::Object {
            required,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn collection(required: bool, items: SchemaNode) -> Self {
        Self::Collection { required, items: Box::new(items) }
    }

    pub fn is_required(&self) -> bool {
        match self {
            Self::Text { required }
            | Self::Object { required, .. }
            | Self::Collection { required, .. }
            | Self::Image { required }
            | Self::Unknown { required, .. } => *required,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::Object { .. } => "object",
            Self::Collection { .. } => "collection",
            Self::Image { .. } => "image",
            Self::Unknown { type_name, .. } => type_name,
        }
    }
}

/// Wire form of a node: `{"type": "...", "required": bool, "fields"?: {...}, "items"?: {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    items: Option<Box<SchemaNode>>,
}

impl TryFrom<RawNode> for SchemaNode {
    type Error = SchemaError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let required = raw.required;
        Ok(match raw.type_name.as_str() {
            "text" => Self::Text { required },
            "image" => Self::Image { required },
            "object" => Self::Object {
                required,
                fields: raw.fields.ok_or(SchemaError::MissingFields)?,
            },
            "collection" => Self::Collection {
                required,
                items: raw.items.ok_or(SchemaError::MissingItems)?,
            },
            _ => Self::Unknown { type_name: raw.type_name, required },
        })
    }
}

impl From<SchemaNode> for RawNode {
    fn from(node: SchemaNode) -> Self {
        let type_name = node.type_name().to_string();
        let required = node.is_required();
        let (fields, items) = match node {
            SchemaNode::Object { fields, .. } => (Some(fields), None),
            SchemaNode::Collection { items, .. } => (None, Some(items)),
            _ => (None, None),
        };
        Self { type_name, required, fields, items }
    }
}

/// A named blueprint: the schema plus its catalogue metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "data_structure")]
    pub schema: Schema,
}

impl Blueprint {
    pub fn from_json(content: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Parse a bare schema map (`{"field": {"type": ...}, ...}`).
pub fn parse_schema(content: &str) -> Result<Schema, SchemaError> {
    Ok(serde_json::from_str(content)?)
}
