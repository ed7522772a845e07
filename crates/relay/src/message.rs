//! Wire message types for the relay WebSocket protocol.
//!
//! Client frames carry a full replacement of the document content plus the
//! sender's cursor bookmark. Server frames echo that edit to every other
//! connected session. Both directions are JSON text frames.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An edit frame received from a client.
///
/// Only `content` is required. `client_id` is whatever the client chose
/// to send and is never validated; `cursor` is opaque to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditMessage {
    pub content: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub cursor: Option<Value>,
}

impl EditMessage {
    /// Create an edit carrying only new content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            client_id: None,
            cursor: None,
        }
    }

    /// Set the originating client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the cursor bookmark.
    pub fn with_cursor(mut self, cursor: Value) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Parse a raw text frame.
    ///
    /// Anything that is not a JSON object with a string `content` field is
    /// an `InvalidMessage`.
    pub fn parse(text: &str) -> RelayResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(RelayError::InvalidMessage(format!(
                "expected a JSON object, found {}",
                json_type_name(&value)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Messages pushed from the server to connected sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Another session replaced the document content.
    ContentUpdate {
        content: String,
        client_id: Option<String>,
        cursor: Option<Value>,
    },
}

impl ServerMessage {
    /// Build the broadcast for an accepted edit.
    pub fn content_update(edit: &EditMessage) -> Self {
        ServerMessage::ContentUpdate {
            content: edit.content.clone(),
            client_id: edit.client_id.clone(),
            cursor: edit.cursor.clone(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
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

    #[test]
    fn test_parse_full_edit() {
        let edit = EditMessage::parse(
            r#"{"content":"Hello","client_id":"c1","cursor":{"line":0,"ch":5}}"#,
        )
        .unwrap();

        assert_eq!(edit.content, "Hello");
        assert_eq!(edit.client_id.as_deref(), Some("c1"));
        assert_eq!(edit.cursor, Some(json!({"line": 0, "ch": 5})));
    }

    #[test]
    fn test_parse_content_only() {
        let edit = EditMessage::parse(r#"{"content":""}"#).unwrap();
        assert_eq!(edit, EditMessage::new(""));
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let edit = EditMessage::parse(r#"{"content":"x","extra":[1,2,3]}"#).unwrap();
        assert_eq!(edit.content, "x");
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        let err = EditMessage::parse(r#"{"client_id":"c1"}"#).unwrap_err();
        assert!(matches!(err, RelayError::InvalidMessage(_)));
    }

    #[test]
    fn test_parse_rejects_non_string_content() {
        let err = EditMessage::parse(r#"{"content":42}"#).unwrap_err();
        assert!(matches!(err, RelayError::InvalidMessage(_)));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        let err = EditMessage::parse(r#"["content"]"#).unwrap_err();
        assert_eq!(
            err,
            RelayError::InvalidMessage("expected a JSON object, found array".to_string())
        );

        assert!(EditMessage::parse("not json at all").is_err());
    }

    #[test]
    fn test_content_update_wire_format() {
        let edit = EditMessage::new("Hello")
            .with_client_id("c1")
            .with_cursor(json!({"line": 0, "ch": 5}));
        let msg = ServerMessage::content_update(&edit);

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "content_update",
                "content": "Hello",
                "client_id": "c1",
                "cursor": {"line": 0, "ch": 5}
            })
        );
    }

    #[test]
    fn test_content_update_absent_fields_are_null() {
        let msg = ServerMessage::content_update(&EditMessage::new("x"));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["client_id"], Value::Null);
        assert_eq!(value["cursor"], Value::Null);
    }
}
