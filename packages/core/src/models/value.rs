//! Typed Property Values
//!
//! Property values are stored as raw JSON in both storage backends and decoded
//! at the adapter boundary using the owning field's declared [`ValueType`].
//! This keeps heterogeneous data out of the core: everything above the adapter
//! layer sees a [`PropertyValue`], never an untyped blob.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a field, fixed at field creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Free-form text
    Text,
    /// Floating point number
    Number,
    /// True/false flag
    Boolean,
    /// Text constrained to an option list (the list itself lives in UI config)
    Select,
    /// Arbitrary JSON document
    Json,
    /// Single reference to another node (stored as the target node id)
    NodeRef,
    /// List of node references in one binding
    NodeRefList,
}

impl ValueType {
    /// Wire name used in both engines' storage formats.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Select => "select",
            ValueType::Json => "json",
            ValueType::NodeRef => "node_ref",
            ValueType::NodeRefList => "node_ref_list",
        }
    }

    /// Parse a wire name back into a `ValueType`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ValueType::Text),
            "number" => Some(ValueType::Number),
            "boolean" => Some(ValueType::Boolean),
            "select" => Some(ValueType::Select),
            "json" => Some(ValueType::Json),
            "node_ref" => Some(ValueType::NodeRef),
            "node_ref_list" => Some(ValueType::NodeRefList),
            _ => None,
        }
    }
}

/// A decoded property value.
///
/// The variant is determined by the owning field's [`ValueType`], not by the
/// shape of the stored JSON. A stored value that does not match its declared
/// type decodes to the [`PropertyValue::Json`] fallback instead of failing the
/// read path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Json(Value),
    NodeRef(String),
    NodeRefList(Vec<String>),
}

impl PropertyValue {
    /// Encode to the raw JSON form stored in the value column/edge.
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Text(s) => Value::String(s.clone()),
            PropertyValue::Number(n) => serde_json::json!(n),
            PropertyValue::Bool(b) => Value::Bool(*b),
            PropertyValue::Json(v) => v.clone(),
            PropertyValue::NodeRef(id) => Value::String(id.clone()),
            PropertyValue::NodeRefList(ids) => {
                Value::Array(ids.iter().map(|id| Value::String(id.clone())).collect())
            }
        }
    }

    /// Decode raw stored JSON using the field's declared type.
    ///
    /// Mismatched data falls back to `Json` so that reads never fail on
    /// legacy or hand-seeded values.
    pub fn from_json(value_type: ValueType, raw: Value) -> Self {
        match value_type {
            ValueType::Text | ValueType::Select => match raw {
                Value::String(s) => PropertyValue::Text(s),
                other => PropertyValue::Json(other),
            },
            ValueType::Number => match raw.as_f64() {
                Some(n) => PropertyValue::Number(n),
                None => PropertyValue::Json(raw),
            },
            ValueType::Boolean => match raw {
                Value::Bool(b) => PropertyValue::Bool(b),
                other => PropertyValue::Json(other),
            },
            ValueType::Json => PropertyValue::Json(raw),
            ValueType::NodeRef => match raw {
                Value::String(id) => PropertyValue::NodeRef(id),
                other => PropertyValue::Json(other),
            },
            ValueType::NodeRefList => match raw {
                Value::Array(items) => {
                    let mut ids = Vec::with_capacity(items.len());
                    for item in &items {
                        match item.as_str() {
                            Some(id) => ids.push(id.to_string()),
                            None => return PropertyValue::Json(Value::Array(items)),
                        }
                    }
                    PropertyValue::NodeRefList(ids)
                }
                other => PropertyValue::Json(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_type_wire_names_round_trip() {
        for vt in [
            ValueType::Text,
            ValueType::Number,
            ValueType::Boolean,
            ValueType::Select,
            ValueType::Json,
            ValueType::NodeRef,
            ValueType::NodeRefList,
        ] {
            assert_eq!(ValueType::parse(vt.as_str()), Some(vt));
        }
        assert_eq!(ValueType::parse("datetime"), None);
    }

    #[test]
    fn test_decode_by_declared_type() {
        assert_eq!(
            PropertyValue::from_json(ValueType::Text, json!("hello")),
            PropertyValue::Text("hello".to_string())
        );
        assert_eq!(
            PropertyValue::from_json(ValueType::Number, json!(3.5)),
            PropertyValue::Number(3.5)
        );
        assert_eq!(
            PropertyValue::from_json(ValueType::Boolean, json!(true)),
            PropertyValue::Bool(true)
        );
        assert_eq!(
            PropertyValue::from_json(ValueType::NodeRef, json!("node-1")),
            PropertyValue::NodeRef("node-1".to_string())
        );
        assert_eq!(
            PropertyValue::from_json(ValueType::NodeRefList, json!(["a", "b"])),
            PropertyValue::NodeRefList(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_mismatched_data_falls_back_to_json() {
        // A number stored under a text field must not fail the read path
        assert_eq!(
            PropertyValue::from_json(ValueType::Text, json!(42)),
            PropertyValue::Json(json!(42))
        );
        // A mixed array under node_ref_list keeps the raw document
        assert_eq!(
            PropertyValue::from_json(ValueType::NodeRefList, json!(["a", 1])),
            PropertyValue::Json(json!(["a", 1]))
        );
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let value = PropertyValue::NodeRefList(vec!["x".to_string(), "y".to_string()]);
        let decoded = PropertyValue::from_json(ValueType::NodeRefList, value.to_json());
        assert_eq!(decoded, value);
    }
}
