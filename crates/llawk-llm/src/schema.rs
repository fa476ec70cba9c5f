//! Vendor-neutral description of an expected JSON output shape.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::LlmError;

/// One node of a JSON-Schema-like document. Parsed once from the schema text
/// and consumed by a backend-specific translation.
///
/// `required` is copied through as-is; nothing checks that the named
/// properties exist.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SchemaNode {
    #[serde(default, rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, rename = "enum")]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, SchemaNode>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub items: Option<Box<SchemaNode>>,
}

impl SchemaNode {
    /// Parse a schema document from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::InvalidSchema`] if the text is not a JSON object
    /// with the expected field types.
    pub fn parse(text: &str) -> Result<Self, LlmError> {
        serde_json::from_str(text).map_err(|e| LlmError::InvalidSchema(e.to_string()))
    }
}

/// Whether a format-flag value is a schema document rather than a format
/// keyword: any syntactically valid JSON object qualifies.
#[must_use]
pub fn is_schema_document(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text).is_ok_and(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested_document() {
        let node = SchemaNode::parse(
            r#"{
                "type": "object",
                "properties": {
                    "a": {"type": "string", "description": "name"},
                    "b": {"type": "array", "items": {"type": "integer"}}
                },
                "required": ["a"]
            }"#,
        )
        .unwrap();

        assert_eq!(node.type_tag, "object");
        assert_eq!(node.properties.len(), 2);
        assert_eq!(node.properties["a"].type_tag, "string");
        assert_eq!(node.properties["a"].description.as_deref(), Some("name"));
        let items = node.properties["b"].items.as_ref().unwrap();
        assert_eq!(items.type_tag, "integer");
        assert_eq!(node.required, vec!["a"]);
    }

    #[test]
    fn parse_enum_and_nullable() {
        let node = SchemaNode::parse(
            r#"{"type": "string", "enum": ["red", "green"], "nullable": true, "format": "color"}"#,
        )
        .unwrap();
        assert_eq!(node.enum_values, vec!["red", "green"]);
        assert!(node.nullable);
        assert_eq!(node.format.as_deref(), Some("color"));
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let err = SchemaNode::parse("{not json").unwrap_err();
        assert!(matches!(err, LlmError::InvalidSchema(_)));
    }

    #[test]
    fn required_without_matching_property_is_kept() {
        let node = SchemaNode::parse(
            r#"{"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a", "ghost"]}"#,
        )
        .unwrap();
        assert_eq!(node.required, vec!["a", "ghost"]);
    }

    #[test]
    fn is_schema_document_accepts_objects_only() {
        assert!(is_schema_document("{}"));
        assert!(is_schema_document(r#"{"type":"object"}"#));
        assert!(!is_schema_document("[1,2]"));
        assert!(!is_schema_document(r#""text""#));
        assert!(!is_schema_document("not json"));
        assert!(!is_schema_document("yaml"));
    }
}
