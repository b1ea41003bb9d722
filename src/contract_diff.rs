//! Structural comparison of a stored response schema against a fresh
//! response body, producing severity-tagged drift warnings.

use serde_json::Value;

use crate::model::{SchemaNode, SchemaNodeKind};

/// How serious a detected drift is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One detected drift between an expected schema and an actual body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub severity: Severity,
    /// Dot/`[]` path to the drifted field, e.g. `data.items[].id`.
    pub path: String,
    pub message: String,
}

/// Diff `expected` (a stored response schema) against `actual` (a
/// freshly decoded response body).
pub fn diff(expected: &SchemaNode, actual: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    diff_node(expected, actual, "", &mut out);
    out
}

fn diff_node(expected: &SchemaNode, actual: &Value, path: &str, out: &mut Vec<DiffEntry>) {
    let actual_kind = kind_of(actual);

    if actual_kind != expected.kind {
        let message = if actual_kind == SchemaNodeKind::Null {
            "became nullable".to_string()
        } else {
            format!("type changed: {} \u{2192} {}", kind_name(expected.kind), kind_name(actual_kind))
        };
        out.push(DiffEntry { severity: Severity::Warn, path: path.to_string(), message });
        return;
    }

    match (expected.kind, actual) {
        (SchemaNodeKind::Object, Value::Object(actual_fields)) => {
            let expected_fields = expected.fields.clone().unwrap_or_default();

            for (key, expected_child) in &expected_fields {
                let child_path = join_path(path, key);
                match actual_fields.get(key) {
                    Some(actual_child) => diff_node(expected_child, actual_child, &child_path, out),
                    None => out.push(DiffEntry {
                        severity: Severity::Error,
                        path: child_path,
                        message: "field disappeared".to_string(),
                    }),
                }
            }

            for key in actual_fields.keys() {
                if !expected_fields.contains_key(key) {
                    out.push(DiffEntry {
                        severity: Severity::Info,
                        path: join_path(path, key),
                        message: "new field".to_string(),
                    });
                }
            }
        }
        (SchemaNodeKind::Array, Value::Array(items)) => {
            if let (Some(expected_items), Some(first)) = (&expected.items, items.first()) {
                diff_node(expected_items, first, &format!("{path}[]"), out);
            }
        }
        _ => {}
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn kind_of(value: &Value) -> SchemaNodeKind {
    match value {
        Value::Null => SchemaNodeKind::Null,
        Value::Bool(_) => SchemaNodeKind::Bool,
        Value::Number(_) => SchemaNodeKind::Number,
        Value::String(_) => SchemaNodeKind::String,
        Value::Array(_) => SchemaNodeKind::Array,
        Value::Object(_) => SchemaNodeKind::Object,
    }
}

fn kind_name(kind: SchemaNodeKind) -> &'static str {
    match kind {
        SchemaNodeKind::Null => "null",
        SchemaNodeKind::Bool => "bool",
        SchemaNodeKind::Number => "number",
        SchemaNodeKind::String => "string",
        SchemaNodeKind::Array => "array",
        SchemaNodeKind::Object => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn leaf(kind: SchemaNodeKind) -> SchemaNode {
        SchemaNode { kind, fields: None, items: None, nullable: false }
    }

    #[test]
    fn detects_type_change_disappearance_and_new_field() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), leaf(SchemaNodeKind::Number));
        fields.insert("name".to_string(), leaf(SchemaNodeKind::String));
        let expected = SchemaNode { kind: SchemaNodeKind::Object, fields: Some(fields), items: None, nullable: false };

        let actual = json!({"id": "7", "email": "x@y"});
        let entries = diff(&expected, &actual);

        assert!(entries.iter().any(|e| e.path == "id" && e.severity == Severity::Warn));
        assert!(entries.iter().any(|e| e.path == "name" && e.severity == Severity::Error));
        assert!(entries.iter().any(|e| e.path == "email" && e.severity == Severity::Info));
    }

    #[test]
    fn top_level_type_change_to_null_is_became_nullable() {
        let expected = leaf(SchemaNodeKind::Object);
        let entries = diff(&expected, &Value::Null);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "became nullable");
    }

    #[test]
    fn array_recurses_into_first_item() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), leaf(SchemaNodeKind::Number));
        let item_schema = SchemaNode { kind: SchemaNodeKind::Object, fields: Some(fields), items: None, nullable: false };
        let expected = SchemaNode {
            kind: SchemaNodeKind::Array,
            fields: None,
            items: Some(Box::new(item_schema)),
            nullable: false,
        };

        let actual = json!([{"id": "not-a-number"}]);
        let entries = diff(&expected, &actual);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "[].id");
    }
}
