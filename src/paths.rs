//! Schema Field Paths
//!
//! Flattens a schema into the dot-joined paths a template can reference.
//! Objects contribute only their children (`user.fields.first`); a
//! collection contributes itself and, for object entries, the entry fields
//! under the same prefix (`skills`, `skills.fields.name`).

use std::collections::BTreeSet;

use crate::schema::{Schema, SchemaNode};

pub fn extract_field_paths(schema: &Schema) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect(schema, "", &mut paths);
    paths
}

fn collect(schema: &Schema, prefix: &str, paths: &mut BTreeSet<String>) {
    for (key, node) in schema {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match node {
            SchemaNode::Object { fields, .. } => collect(fields, &format!("{path}.fields"), paths),
            SchemaNode::Collection { items, .. } => {
                if let SchemaNode::Object { fields, .. } = items.as_ref() {
                    collect(fields, &format!("{path}.fields"), paths);
                }
                paths.insert(path);
            }
            SchemaNode::Text { .. } | SchemaNode::Image { .. } | SchemaNode::Unknown { .. } => {
                paths.insert(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(value: serde_json::Value) -> Vec<String> {
        let schema: Schema = serde_json::from_value(value).unwrap();
        extract_field_paths(&schema).into_iter().collect()
    }

    #[test]
    fn test_objects_are_not_leaves() {
        let found = paths(json!({
            "user": {"type": "object", "fields": {
                "first": {"type": "text"},
                "address": {"type": "object", "fields": {"city": {"type": "text"}}}
            }}
        }));
        assert_eq!(found, vec!["user.fields.address.fields.city", "user.fields.first"]);
    }

    #[test]
    fn test_collection_is_itself_a_path() {
        let found = paths(json!({
            "title": {"type": "text"},
            "logo": {"type": "image"},
            "tags": {"type": "collection", "items": {"type": "text"}},
            "sections": {"type": "collection", "items": {"type": "object", "fields": {
                "title": {"type": "text"},
                "illustration": {"type": "image"}
            }}}
        }));
        assert_eq!(
            found,
            vec![
                "logo",
                "sections",
                "sections.fields.illustration",
                "sections.fields.title",
                "tags",
                "title",
            ]
        );
    }

    #[test]
    fn test_nested_collections() {
        let found = paths(json!({
            "departments": {"type": "collection", "items": {"type": "object", "fields": {
                "employees": {"type": "collection", "items": {"type": "object", "fields": {
                    "name": {"type": "text"}
                }}}
            }}}
        }));
        assert_eq!(
            found,
            vec![
                "departments",
                "departments.fields.employees",
                "departments.fields.employees.fields.name",
            ]
        );
    }
}
