// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Example argument generation for catalog entries.

use serde_json::{json, Map, Value};

use super::{PrimitiveType, Schema};

/// Minimal arguments: required fields only, simplest values.
pub fn basic_example(schema: &Schema) -> Value {
    generate(schema, false)
}

/// Full arguments with richer values.
///
/// Only produced for objects with more than two properties; smaller tools
/// are fully described by the basic example.
pub fn advanced_example(schema: &Schema) -> Option<Value> {
    if schema.property_count() > 2 {
        Some(generate(schema, true))
    } else {
        None
    }
}

fn generate(schema: &Schema, advanced: bool) -> Value {
    match schema {
        Schema::Any => Value::Null,
        Schema::Primitive { ty, default, .. } => {
            if let Some(default) = default {
                return default.clone();
            }
            match (ty, advanced) {
                (PrimitiveType::String, false) => json!("example"),
                (PrimitiveType::String, true) => json!("example value"),
                (PrimitiveType::Number, false) => json!(0.0),
                (PrimitiveType::Number, true) => json!(1.5),
                (PrimitiveType::Integer, false) => json!(0),
                (PrimitiveType::Integer, true) => json!(10),
                (PrimitiveType::Boolean, advanced) => json!(advanced),
                (PrimitiveType::Null, _) => Value::Null,
            }
        }
        Schema::Enum { values } => {
            let pick = if advanced { values.last() } else { values.first() };
            pick.cloned().unwrap_or(Value::Null)
        }
        Schema::Array {
            items, min_items, ..
        } => {
            let count = if advanced {
                min_items.unwrap_or(0).max(1)
            } else {
                min_items.unwrap_or(0)
            };
            Value::Array((0..count).map(|_| generate(items, advanced)).collect())
        }
        Schema::Object {
            properties,
            required,
            ..
        } => {
            let mut out = Map::new();
            for (name, field) in properties {
                if advanced || required.contains(name) {
                    out.insert(name.clone(), generate(field, advanced));
                }
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::from_json_schema(&json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "default": 10},
                "mode": {"enum": ["fast", "balanced", "deep"]},
                "exact": {"type": "boolean"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["query", "mode"]
        }))
    }

    #[test]
    fn test_basic_example_required_only() {
        let example = basic_example(&schema());
        assert_eq!(example, json!({"query": "example", "mode": "fast"}));
    }

    #[test]
    fn test_basic_example_validates() {
        let schema = schema();
        assert!(schema.validate(&basic_example(&schema)).is_ok());
    }

    #[test]
    fn test_advanced_example_all_fields() {
        let schema = schema();
        let example = advanced_example(&schema).unwrap();
        assert_eq!(example["mode"], "deep");
        assert_eq!(example["limit"], 10);
        assert_eq!(example["exact"], true);
        assert_eq!(example["tags"], json!(["example value"]));
        assert!(schema.validate(&example).is_ok());
    }

    #[test]
    fn test_advanced_example_needs_three_properties() {
        let small = Schema::from_json_schema(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}, "b": {"type": "number"}}
        }));
        assert!(advanced_example(&small).is_none());
        assert_eq!(basic_example(&small), json!({}));
    }
}
