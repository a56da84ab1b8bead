// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool input schemas.
//!
//! Tool servers describe their inputs with JSON Schema. The subset we care
//! about is parsed once into [`Schema`], a tagged variant type, and every
//! consumer (argument validation, example generation, cache keys) walks that
//! type recursively instead of poking at raw JSON.

mod examples;
mod validate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use examples::{advanced_example, basic_example};
pub use validate::ValidationIssue;

/// Scalar JSON types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl PrimitiveType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    /// Name used in validation messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

/// Parsed input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schema {
    Primitive {
        ty: PrimitiveType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    Array {
        items: Box<Schema>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    Object {
        properties: BTreeMap<String, Schema>,
        #[serde(default)]
        required: Vec<String>,
        #[serde(default = "default_additional")]
        additional_properties: bool,
    },
    Enum {
        values: Vec<Value>,
    },
    Any,
}

fn default_additional() -> bool {
    true
}

impl Default for Schema {
    fn default() -> Self {
        Self::empty_object()
    }
}

impl Schema {
    /// Object schema with no declared properties.
    pub fn empty_object() -> Self {
        Self::Object {
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: true,
        }
    }

    /// Parse a JSON Schema document.
    ///
    /// Unknown constructs degrade to [`Schema::Any`] rather than failing, so a
    /// server with an exotic schema stays usable.
    pub fn from_json_schema(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Any;
        };

        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            return Self::Enum {
                values: values.clone(),
            };
        }

        let ty = match obj.get("type") {
            Some(Value::String(s)) => Some(s.as_str()),
            // ["string", "null"] style unions: take the first non-null type.
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null")
                .or(Some("null")),
            _ => None,
        };

        match ty {
            Some("object") => Self::parse_object(obj),
            Some("array") => Self::Array {
                items: Box::new(
                    obj.get("items")
                        .map(Self::from_json_schema)
                        .unwrap_or(Self::Any),
                ),
                min_items: obj.get("minItems").and_then(as_usize),
                max_items: obj.get("maxItems").and_then(as_usize),
            },
            Some(name) => match PrimitiveType::from_name(name) {
                Some(ty) => Self::Primitive {
                    ty,
                    description: obj
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                    default: obj.get("default").cloned(),
                },
                None => Self::Any,
            },
            None if obj.contains_key("properties") => Self::parse_object(obj),
            None => Self::Any,
        }
    }

    fn parse_object(obj: &Map<String, Value>) -> Self {
        let properties = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| (name.clone(), Self::from_json_schema(schema)))
                    .collect()
            })
            .unwrap_or_default();
        let required = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        let additional_properties = !matches!(obj.get("additionalProperties"), Some(Value::Bool(false)));

        Self::Object {
            properties,
            required,
            additional_properties,
        }
    }

    /// Validate `value` against this schema, collecting every issue found.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        validate::check(self, value, "$", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Number of top-level properties (zero for non-objects).
    pub fn property_count(&self) -> usize {
        match self {
            Self::Object { properties, .. } => properties.len(),
            _ => 0,
        }
    }
}

fn as_usize(value: &Value) -> Option<usize> {
    value.as_u64().and_then(|n| usize::try_from(n).ok())
}

/// Serialize with object keys sorted at every depth.
///
/// Two argument objects that differ only in key order produce the same text.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let ordered: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                let mut out = Map::new();
                for (k, v) in ordered {
                    out.insert(k.clone(), v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}
