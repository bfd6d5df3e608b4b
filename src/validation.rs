//! Validation System - Payload Against Blueprint
//!
//! The walk never stops at the first problem: every violation in the payload
//! is collected and reported together.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::images::Attachment;
use crate::schema::{Payload, Schema, SchemaNode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingRequired,
    TypeMismatch,
    ShapeMismatch,
    EmptyCollection,
    ImageUnresolved,
    UnknownFieldType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Violation {
    fn new(kind: ViolationKind, path: &str, message: String) -> Self {
        Self {
            kind,
            path: path.to_string(),
            message,
            expected: None,
            actual: None,
        }
    }

    fn with_types(mut self, expected: &str, actual: &Value) -> Self {
        self.expected = Some(expected.to_string());
        self.actual = Some(json_type(actual).to_string());
        self
    }
}

/// Aggregate failure carrying every violation found in one pass.
#[derive(Debug, Clone, Error)]
#[error("Data validation failed with {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self { valid: true, violations: vec![] }
    }

    pub fn failure(violations: Vec<Violation>) -> Self {
        Self { valid: false, violations }
    }

    pub fn has_kind(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.valid {
            Ok(())
        } else {
            Err(ValidationError { violations: self.violations })
        }
    }
}

/// Walks a payload against a schema. Stateless; safe to share.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Collect all violations without failing.
    pub fn check(&self, schema: &Schema, payload: &Payload, attachments: &[Attachment]) -> ValidationResult {
        let mut walk = Walk { attachments, violations: vec![] };
        walk.fields(schema, payload, "");

        if walk.violations.is_empty() {
            ValidationResult::success()
        } else {
            ValidationResult::failure(walk.violations)
        }
    }

    pub fn validate(
        &self,
        schema: &Schema,
        payload: &Payload,
        attachments: &[Attachment],
    ) -> Result<(), ValidationError> {
        self.check(schema, payload, attachments).into_result()
    }
}

struct Walk<'a> {
    attachments: &'a [Attachment],
    violations: Vec<Violation>,
}

impl Walk<'_> {
    fn fields(&mut self, schema: &Schema, values: &Map<String, Value>, prefix: &str) {
        for (key, node) in schema {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            self.node(node, values.get(key), &path);
        }
    }

    fn node(&mut self, node: &SchemaNode, value: Option<&Value>, path: &str) {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => {
                if node.is_required() {
                    self.push(Violation::new(
                        ViolationKind::MissingRequired,
                        path,
                        format!("Missing required field {path}"),
                    ));
                }
                return;
            }
        };

        match node {
            SchemaNode::Text { .. } => {
                if !value.is_string() {
                    self.push(
                        Violation::new(
                            ViolationKind::TypeMismatch,
                            path,
                            format!("Field {path} should be a string"),
                        )
                        .with_types("string", value),
                    );
                }
            }

            SchemaNode::Object { fields, .. } => match value.get("fields").and_then(Value::as_object) {
                Some(inner) => self.fields(fields, inner, &format!("{path}.fields")),
                None => self.push(Violation::new(
                    ViolationKind::ShapeMismatch,
                    path,
                    format!("Value for {path} is missing 'fields'"),
                )),
            },

            SchemaNode::Collection { required, items } => {
                let Some(entries) = value.get("items").and_then(Value::as_array) else {
                    self.push(Violation::new(
                        ViolationKind::ShapeMismatch,
                        path,
                        format!("Value for {path} is missing 'items'"),
                    ));
                    return;
                };

                if entries.is_empty() {
                    if *required {
                        self.push(Violation::new(
                            ViolationKind::EmptyCollection,
                            path,
                            format!("Collection {path}.items should not be empty"),
                        ));
                    }
                    return;
                }

                for (i, entry) in entries.iter().enumerate() {
                    self.node(items, Some(entry), &format!("{path}.items[{i}]"));
                }
            }

            SchemaNode::Image { .. } => self.image(value, path),

            SchemaNode::Unknown { type_name, .. } => self.push(Violation::new(
                ViolationKind::UnknownFieldType,
                path,
                format!("Unknown field type for {path}: {type_name}"),
            )),
        }
    }

    fn image(&mut self, value: &Value, path: &str) {
        let Some(image) = value.as_object() else {
            self.push(
                Violation::new(
                    ViolationKind::TypeMismatch,
                    path,
                    format!("Field {path} should be an object"),
                )
                .with_types("object", value),
            );
            return;
        };

        if !image.get("id").is_some_and(Value::is_string) {
            let id_path = format!("{path}.id");
            let message = format!("Field {id_path} should be a string");
            let mut violation = Violation::new(ViolationKind::TypeMismatch, &id_path, message);
            violation.expected = Some("string".to_string());
            violation.actual = Some(image.get("id").map_or("missing", json_type).to_string());
            self.push(violation);
        }

        let Some(filename) = image.get("filename").and_then(Value::as_str) else {
            let filename_path = format!("{path}.filename");
            let message = format!("Field {filename_path} should be a string");
            let mut violation = Violation::new(ViolationKind::TypeMismatch, &filename_path, message);
            violation.expected = Some("string".to_string());
            violation.actual = Some(image.get("filename").map_or("missing", json_type).to_string());
            self.push(violation);
            return;
        };

        if !self.attachments.iter().any(|a| a.original_filename == filename) {
            let mut violation = Violation::new(
                ViolationKind::ImageUnresolved,
                path,
                format!("Image {path} doesn't have matching file"),
            );
            violation.expected = Some(filename.to_string());
            self.push(violation);
        }
    }

    fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn schema(value: Value) -> Schema {
        serde_json::from_value(value).unwrap()
    }

    fn attachment(name: &str) -> Attachment {
        Attachment::new(name, "image/png", vec![1, 2, 3])
    }

    #[test]
    fn test_missing_required_text() {
        let s = schema(json!({"name": {"type": "text", "required": true}}));
        let result = Validator::new().check(&s, &payload(json!({})), &[]);

        assert!(!result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::MissingRequired);
        assert_eq!(result.violations[0].path, "name");
    }

    #[test]
    fn test_missing_nested_field_uses_fields_path() {
        let s = schema(json!({
            "user": {"type": "object", "required": true, "fields": {
                "first": {"type": "text", "required": true}
            }}
        }));
        let result = Validator::new().check(&s, &payload(json!({"user": {"fields": {}}})), &[]);

        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::MissingRequired);
        assert_eq!(result.violations[0].path, "user.fields.first");
    }

    #[test]
    fn test_optional_absent_is_skipped() {
        let s = schema(json!({"nickname": {"type": "text"}}));
        assert!(Validator::new().check(&s, &payload(json!({"nickname": null})), &[]).valid);
    }

    #[test]
    fn test_siblings_checked_after_failure() {
        let s = schema(json!({
            "a": {"type": "text", "required": true},
            "b": {"type": "text", "required": true},
            "c": {"type": "text"}
        }));
        let result = Validator::new().check(&s, &payload(json!({"c": 42})), &[]);

        assert_eq!(result.violations.len(), 3);
        let mismatch = result.violations.iter().find(|v| v.path == "c").unwrap();
        assert_eq!(mismatch.kind, ViolationKind::TypeMismatch);
        assert_eq!(mismatch.actual.as_deref(), Some("number"));
    }

    #[test]
    fn test_object_without_fields_container() {
        let s = schema(json!({"user": {"type": "object", "required": true, "fields": {
            "firstname": {"type": "text", "required": true}
        }}}));
        let result = Validator::new().check(&s, &payload(json!({"user": {"firstname": "Jean"}})), &[]);

        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::ShapeMismatch);
    }

    #[test]
    fn test_every_collection_entry_validated() {
        let s = schema(json!({"skills": {"type": "collection", "required": true, "items": {
            "type": "object", "required": true, "fields": {
                "name": {"type": "text", "required": true},
                "level": {"type": "text", "required": true}
            }
        }}}));
        let p = payload(json!({"skills": {"items": [
            {"fields": {"name": "Rust", "level": "Advanced"}},
            {"fields": {"name": "Go"}},
            {"fields": {}}
        ]}}));
        let result = Validator::new().check(&s, &p, &[]);

        let paths: Vec<_> = result.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "skills.items[1].fields.level",
                "skills.items[2].fields.level",
                "skills.items[2].fields.name",
            ]
        );
    }

    #[test]
    fn test_empty_collection_only_fails_when_required() {
        let required = schema(json!({"list": {"type": "collection", "required": true, "items": {"type": "text"}}}));
        let optional = schema(json!({"list": {"type": "collection", "items": {"type": "text"}}}));
        let p = payload(json!({"list": {"items": []}}));

        let result = Validator::new().check(&required, &p, &[]);
        assert!(result.has_kind(ViolationKind::EmptyCollection));
        assert!(Validator::new().check(&optional, &p, &[]).valid);
    }

    #[test]
    fn test_collection_without_items_container() {
        let s = schema(json!({"list": {"type": "collection", "items": {"type": "text"}}}));
        let result = Validator::new().check(&s, &payload(json!({"list": ["a", "b"]})), &[]);
        assert!(result.has_kind(ViolationKind::ShapeMismatch));
    }

    #[test]
    fn test_image_requires_matching_attachment() {
        let s = schema(json!({
            "avatar": {"type": "image", "required": true},
            "logo": {"type": "image", "required": true}
        }));
        let p = payload(json!({
            "avatar": {"id": "img-1", "filename": "avatar.jpg"},
            "logo": {"id": "img-2", "filename": "logo.png"}
        }));
        let result = Validator::new().check(&s, &p, &[attachment("avatar.jpg")]);

        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::ImageUnresolved);
        assert_eq!(result.violations[0].path, "logo");
    }

    #[test]
    fn test_image_shape_errors() {
        let s = schema(json!({
            "a": {"type": "image", "required": true},
            "b": {"type": "image", "required": true}
        }));
        let p = payload(json!({"a": "avatar.jpg", "b": {"id": "x"}}));
        let result = Validator::new().check(&s, &p, &[]);

        assert_eq!(result.violations.len(), 2);
        assert!(result.violations.iter().all(|v| v.kind == ViolationKind::TypeMismatch));
        assert!(result.violations.iter().any(|v| v.path == "b.filename"));
    }

    #[test]
    fn test_image_id_must_be_string() {
        let s = schema(json!({
            "a": {"type": "image", "required": true},
            "b": {"type": "image", "required": true}
        }));
        let p = payload(json!({
            "a": {"id": 1, "filename": "a.png"},
            "b": {"filename": "a.png"}
        }));
        let result = Validator::new().check(&s, &p, &[attachment("a.png")]);

        assert!(!result.valid);
        let paths: Vec<_> = result.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["a.id", "b.id"]);
        assert_eq!(result.violations[0].actual.as_deref(), Some("number"));
        assert_eq!(result.violations[1].actual.as_deref(), Some("missing"));
    }

    #[test]
    fn test_unknown_field_type_reported() {
        let s = schema(json!({"grid": {"type": "table", "required": false}}));
        let result = Validator::new().check(&s, &payload(json!({"grid": []})), &[]);
        assert!(result.has_kind(ViolationKind::UnknownFieldType));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let s = schema(json!({
            "z": {"type": "text", "required": true},
            "a": {"type": "object", "required": true, "fields": {"b": {"type": "text", "required": true}}},
            "m": {"type": "image", "required": true}
        }));
        let p = payload(json!({"a": {"fields": {"b": 1}}, "m": {"filename": "none.png"}}));

        let first = Validator::new().check(&s, &p, &[]);
        let second = Validator::new().check(&s, &p, &[]);
        assert_eq!(first.violations, second.violations);
    }

    #[test]
    fn test_validate_returns_aggregate_error() {
        let s = schema(json!({
            "a": {"type": "text", "required": true},
            "b": {"type": "text", "required": true}
        }));
        let err = Validator::new().validate(&s, &payload(json!({})), &[]).unwrap_err();
        assert_eq!(err.violations.len(), 2);
        assert!(err.to_string().contains("2 violation(s)"));
    }
}
