// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PrimitiveType, Schema};

/// One problem found while validating arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON path of the offending value, rooted at `$`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn issue(out: &mut Vec<ValidationIssue>, path: &str, message: impl Into<String>) {
    out.push(ValidationIssue {
        path: path.to_string(),
        message: message.into(),
    });
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_primitive(ty: PrimitiveType, value: &Value) -> bool {
    match ty {
        PrimitiveType::String => value.is_string(),
        PrimitiveType::Number => value.is_number(),
        PrimitiveType::Integer => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        PrimitiveType::Boolean => value.is_boolean(),
        PrimitiveType::Null => value.is_null(),
    }
}

pub(super) fn check(schema: &Schema, value: &Value, path: &str, out: &mut Vec<ValidationIssue>) {
    match schema {
        Schema::Any => {}
        Schema::Primitive { ty, .. } => {
            if !matches_primitive(*ty, value) {
                issue(
                    out,
                    path,
                    format!("expected {}, got {}", ty.as_str(), type_name(value)),
                );
            }
        }
        Schema::Enum { values } => {
            if !values.contains(value) {
                issue(out, path, format!("value {} is not one of {:?}", value, values));
            }
        }
        Schema::Array {
            items,
            min_items,
            max_items,
        } => {
            let Some(elements) = value.as_array() else {
                issue(out, path, format!("expected array, got {}", type_name(value)));
                return;
            };
            if let Some(min) = min_items {
                if elements.len() < *min {
                    issue(out, path, format!("expected at least {} items, got {}", min, elements.len()));
                }
            }
            if let Some(max) = max_items {
                if elements.len() > *max {
                    issue(out, path, format!("expected at most {} items, got {}", max, elements.len()));
                }
            }
            for (i, element) in elements.iter().enumerate() {
                check(items, element, &format!("{}[{}]", path, i), out);
            }
        }
        Schema::Object {
            properties,
            required,
            additional_properties,
        } => {
            let Some(fields) = value.as_object() else {
                issue(out, path, format!("expected object, got {}", type_name(value)));
                return;
            };
            for name in required {
                if !fields.contains_key(name) {
                    issue(out, &format!("{}.{}", path, name), "required field missing");
                }
            }
            for (name, field) in fields {
                let field_path = format!("{}.{}", path, name);
                match properties.get(name) {
                    Some(field_schema) => check(field_schema, field, &field_path, out),
                    None if !additional_properties => {
                        issue(out, &field_path, "unexpected field");
                    }
                    None => {}
                }
            }
        }
    }
}
